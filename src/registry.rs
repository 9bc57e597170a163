//! Module registry: maps module names to stable numeric ids and port
//! signatures.
//!
//! The registry is loaded once from a JSON descriptor (see
//! `data/modules.json`) and is read-only afterwards. The compiler looks up
//! names while lowering a patch; the VM maps ids straight to constructors
//! and only consults the registry for diagnostics.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Port signature of one module type. The declaration order of the port
/// names is the canonical index order used by the compiler and the VM.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleInfo {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown module name: {0}")]
    UnknownModule(String),
    #[error("bad module descriptor: {0}")]
    BadDescriptor(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Descriptor {
    modules: Vec<DescriptorEntry>,
}

#[derive(Deserialize)]
struct DescriptorEntry {
    name: String,
    id: u32,
    info: ModuleInfo,
}

pub struct ModuleRegistry {
    name_to_id: HashMap<String, u32>,
    name_to_info: HashMap<String, ModuleInfo>,
    id_to_name: HashMap<u32, String>,
}

impl ModuleRegistry {
    /// Parse a descriptor in the `{"modules": [{name, id, info}]}` shape.
    pub fn from_json(text: &str) -> Result<ModuleRegistry, RegistryError> {
        let descriptor: Descriptor = serde_json::from_str(text)?;

        let mut name_to_id = HashMap::new();
        let mut name_to_info = HashMap::new();
        let mut id_to_name = HashMap::new();
        for entry in descriptor.modules {
            name_to_id.insert(entry.name.clone(), entry.id);
            id_to_name.insert(entry.id, entry.name.clone());
            name_to_info.insert(entry.name, entry.info);
        }

        Ok(ModuleRegistry {
            name_to_id,
            name_to_info,
            id_to_name,
        })
    }

    /// The registry for the built-in module library, embedded at compile
    /// time from `data/modules.json`.
    pub fn with_builtins() -> ModuleRegistry {
        ModuleRegistry::from_json(include_str!("../data/modules.json"))
            .expect("embedded module descriptor is well-formed")
    }

    pub fn id_of(&self, name: &str) -> Result<u32, RegistryError> {
        self.name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownModule(name.to_owned()))
    }

    pub fn info_of(&self, name: &str) -> Result<&ModuleInfo, RegistryError> {
        self.name_to_info
            .get(name)
            .ok_or_else(|| RegistryError::UnknownModule(name.to_owned()))
    }

    /// Reverse lookup, used by the disassembler and diagnostics.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }
}
