//! Struct Registrar
//!
//! Flattens a record's declared members into one namespace of exposed names.
//! Composite members are walked recursively and their members exposed as
//! `<member><separator><name>`, to any depth. The result is a static table
//! from exposed name to access path; nothing is resolved at access time
//! beyond a hash lookup and the path walk.

use crate::error::{Error, RegistrationError, Result};
use crate::host::{HostType, HostValue, Member, Object, Reflect, StructDef};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// What an exposed name resolves to.
#[derive(Debug, Clone)]
pub enum Access {
    Field {
        member: &'static str,
        ty: HostType,
    },
    Method {
        member: &'static str,
        params: Vec<HostType>,
        returns: Vec<HostType>,
    },
}

/// One entry of a flattened namespace.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    exposed_name: String,
    /// Composite members walked from the root record to the owner of `access`.
    path: Vec<&'static str>,
    access: Access,
}

impl FieldEntry {
    pub fn exposed_name(&self) -> &str {
        &self.exposed_name
    }

    pub fn path(&self) -> &[&'static str] {
        &self.path
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn is_method(&self) -> bool {
        matches!(self.access, Access::Method { .. })
    }

    pub(crate) fn read(&self, object: &Object) -> Result<HostValue> {
        let Access::Field { member, .. } = &self.access else {
            return Err(self.unknown(object));
        };
        let root = object.borrow()?;
        walk(&*root, &self.path)
            .and_then(|owner| owner.field(member))
            .ok_or_else(|| self.unknown(object))
    }

    /// Store `value` into the field. A failed conversion leaves the field untouched.
    pub(crate) fn write(&self, object: &Object, value: HostValue) -> Result<()> {
        let member = match &self.access {
            Access::Field { member, .. } => *member,
            Access::Method { .. } => {
                return Err(Error::MethodAssignment {
                    type_name: object.def().name.to_string(),
                    name: self.exposed_name.clone(),
                })
            }
        };
        let mut root = object.borrow_mut()?;
        match walk_mut(&mut *root, &self.path).and_then(|owner| owner.set_field(member, value)) {
            Some(result) => Ok(result?),
            None => Err(self.unknown(object)),
        }
    }

    pub(crate) fn call(&self, object: &Object, args: Vec<HostValue>) -> Result<Vec<HostValue>> {
        let Access::Method { member, .. } = &self.access else {
            return Err(self.unknown(object));
        };
        let mut root = object.borrow_mut()?;
        match walk_mut(&mut *root, &self.path).and_then(|owner| owner.call_method(member, args)) {
            Some(result) => result,
            None => Err(self.unknown(object)),
        }
    }

    fn unknown(&self, object: &Object) -> Error {
        Error::UnknownMember {
            type_name: object.def().name.to_string(),
            name: self.exposed_name.clone(),
        }
    }
}

fn walk<'a>(mut target: &'a dyn Reflect, path: &[&str]) -> Option<&'a dyn Reflect> {
    for name in path {
        target = target.nested(name)?;
    }
    Some(target)
}

fn walk_mut<'a>(mut target: &'a mut dyn Reflect, path: &[&str]) -> Option<&'a mut dyn Reflect> {
    for name in path {
        target = target.nested_mut(name)?;
    }
    Some(target)
}

/// Flattened namespace of one registered record type.
#[derive(Debug)]
pub struct StructLayout {
    entries: HashMap<String, Rc<FieldEntry>>,
}

impl StructLayout {
    pub fn entry(&self, name: &str) -> Option<Rc<FieldEntry>> {
        self.entries.get(name).cloned()
    }

    /// Exposed names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registered record layouts of one runtime instance.
#[derive(Debug)]
pub struct StructRegistrar {
    separator: String,
    layouts: RefCell<HashMap<TypeId, Rc<StructLayout>>>,
}

impl StructRegistrar {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            layouts: RefCell::new(HashMap::new()),
        }
    }

    /// Flatten and store the layout of `def`. Registering a type twice returns the stored layout.
    ///
    /// A name collision fails the whole registration; nothing is stored.
    pub fn register(&self, def: &'static StructDef) -> Result<Rc<StructLayout>, RegistrationError> {
        if let Some(layout) = self.layout(def) {
            return Ok(layout);
        }

        let mut entries = HashMap::new();
        self.flatten(def, def.name, "", &[], &mut entries)?;
        let layout = Rc::new(StructLayout { entries });

        debug!(type_name = def.name, fields = ?layout.names(), "struct registered");
        self.layouts
            .borrow_mut()
            .insert((def.type_id)(), Rc::clone(&layout));
        Ok(layout)
    }

    pub fn layout(&self, def: &StructDef) -> Option<Rc<StructLayout>> {
        self.layouts.borrow().get(&(def.type_id)()).cloned()
    }

    fn flatten(
        &self,
        def: &'static StructDef,
        root_name: &str,
        prefix: &str,
        path: &[&'static str],
        entries: &mut HashMap<String, Rc<FieldEntry>>,
    ) -> Result<(), RegistrationError> {
        for member in def.members {
            let exposed_name = if prefix.is_empty() {
                member.name().to_string()
            } else {
                format!("{prefix}{}{}", self.separator, member.name())
            };

            let access = match member {
                Member::Field { name, ty } => Access::Field {
                    member: *name,
                    ty: ty(),
                },
                Member::Method {
                    name,
                    params,
                    returns,
                } => Access::Method {
                    member: *name,
                    params: params(),
                    returns: returns(),
                },
                Member::Composite { name, def: nested } => {
                    let mut nested_path = path.to_vec();
                    nested_path.push(*name);
                    self.flatten(nested(), root_name, &exposed_name, &nested_path, entries)?;
                    continue;
                }
            };

            if entries.contains_key(&exposed_name) {
                return Err(RegistrationError::DuplicateField {
                    type_name: root_name.to_string(),
                    field: exposed_name,
                });
            }
            let entry = FieldEntry {
                exposed_name: exposed_name.clone(),
                path: path.to_vec(),
                access,
            };
            entries.insert(exposed_name, Rc::new(entry));
        }
        Ok(())
    }
}
