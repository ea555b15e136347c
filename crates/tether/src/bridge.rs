//! Per-runtime bridge state
//!
//! One [`Bridge`] exists per runtime instance and is passed explicitly to
//! every conversion. It holds the reference registry, the proxy table and the
//! struct layouts, so independent runtimes never share state.

use crate::error::{Error, Result};
use crate::handle::Arena;
use crate::host::StructDef;
use crate::registry::ReferenceRegistry;
use crate::settings::Settings;
use crate::structs::{StructLayout, StructRegistrar};
use mlua::{Lua, RegistryKey};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct Bridge {
    lua: Weak<Lua>,
    pub(crate) references: ReferenceRegistry,
    /// Strong runtime references held by live proxies.
    pub(crate) proxies: RefCell<Arena<RegistryKey>>,
    pub(crate) structs: StructRegistrar,
    pub(crate) settings: Settings,
}

impl Bridge {
    pub(crate) fn new(lua: &Rc<Lua>, settings: Settings) -> Rc<Self> {
        Rc::new(Self {
            lua: Rc::downgrade(lua),
            references: ReferenceRegistry::new(),
            proxies: RefCell::new(Arena::new()),
            structs: StructRegistrar::new(settings.field_separator.clone()),
            settings,
        })
    }

    /// The runtime this bridge belongs to, if it is still open.
    pub(crate) fn lua(&self) -> Result<Rc<Lua>> {
        self.lua.upgrade().ok_or(Error::RuntimeClosed)
    }

    /// Layout for a record type, registering it on first use when allowed.
    pub(crate) fn layout(&self, def: &'static StructDef) -> Result<Rc<StructLayout>> {
        if let Some(layout) = self.structs.layout(def) {
            return Ok(layout);
        }
        if !self.settings.auto_register_structs {
            return Err(Error::Unsupported {
                kind: def.name.to_string(),
                operation: "indexed before registration",
            });
        }
        Ok(self.structs.register(def)?)
    }
}
