use crate::config::{ConfigReader, Settings};
use crate::error::DiscretizationError;
use crate::space::FunctionSpace;
use log::{debug, info};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named mesh configurations and the function spaces created from them.
///
/// Function spaces of named meshes are created on first use and shared afterwards.
/// Meshes defined inline in a section without `meshName` are created anew on every request.
#[derive(Debug, Default)]
pub struct MeshManager {
    configurations: BTreeMap<String, Settings>,
    function_spaces: FxHashMap<String, Arc<FunctionSpace>>,
}

impl MeshManager {
    /// Reads the named mesh sections under `Meshes`.
    pub fn new(settings: &Settings) -> eyre::Result<Self> {
        let meshes = settings.sub_or_empty("Meshes")?;
        let mut configurations = BTreeMap::new();
        for name in meshes.keys() {
            configurations.insert(name.clone(), meshes.sub(&name)?);
        }
        debug!("{} mesh configurations", configurations.len());
        Ok(Self {
            configurations,
            function_spaces: FxHashMap::default(),
        })
    }

    pub fn has_function_space(&self, name: &str) -> bool {
        self.function_spaces.contains_key(name)
    }

    pub fn has_mesh_configuration(&self, name: &str) -> bool {
        self.configurations.contains_key(name)
    }

    /// Registers an existing function space under `name`, replacing any previous one.
    pub fn insert_function_space(&mut self, name: impl Into<String>, space: FunctionSpace) -> Arc<FunctionSpace> {
        let name = name.into();
        let space = Arc::new(space.with_name(name.clone()));
        self.function_spaces.insert(name, Arc::clone(&space));
        space
    }

    /// The function space for a section, resolved through its `meshName` or created from the
    /// section itself.
    pub fn function_space(&mut self, config: &impl ConfigReader) -> eyre::Result<Arc<FunctionSpace>> {
        let name = match config.get::<String>("meshName")? {
            Some(name) => name,
            None => {
                debug!("Creating anonymous function space for {}", config.section_path());
                return Ok(Arc::new(FunctionSpace::from_settings(config)?));
            }
        };

        if let Some(space) = self.function_spaces.get(&name) {
            return Ok(Arc::clone(space));
        }
        let settings = self.configurations.get(&name).ok_or_else(|| {
            DiscretizationError::config(
                config.key_path("meshName"),
                format!("no mesh named `{name}` is configured under `Meshes`"),
            )
        })?;
        let space = FunctionSpace::from_settings(settings)?;
        info!("Created function space for mesh `{name}`");
        Ok(self.insert_function_space(name, space))
    }
}
