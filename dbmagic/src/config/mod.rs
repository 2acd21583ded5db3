//! Layered YAML configuration.
//!
//! A program keeps its settings under `config/` next to where it runs:
//!
//! ```yaml
//! # config/config.default
//! name: gophers
//! verbose: false
//! source:
//!   path: $DATA_DIR/go.csv
//!   handle: per_query
//! ```
//!
//! `config/config.default` is required. When `APP_ENV` is set,
//! `config/config.$APP_ENV` is required as well and its values win over the
//! default file. After merging, every string field of the destination has
//! its `$VAR` / `${VAR}` references replaced from the environment.

mod expand;

pub use dbmagic_derive::ExpandEnv;
pub use expand::{expand_str, EnvLookup, ExpandEnv};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Base configuration file, relative to the loader root.
pub const DEFAULT_FILE: &str = "config/config.default";

/// Environment variable naming the overlay file.
pub const ENV_SELECTOR: &str = "APP_ENV";

/// Loads configuration layers from `<root>/config/`.
pub struct ConfigLoader {
    root: PathBuf,
    env: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl ConfigLoader {
    /// A loader rooted at `root` that reads the process environment.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ConfigLoader {
            root: root.into(),
            env: Box::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup, both for `APP_ENV` and for expansion.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the base file is present as a regular file.
    pub fn has_default_file(&self) -> bool {
        is_regular_file(&self.root.join(DEFAULT_FILE))
    }

    /// The configuration files to read, in precedence order (last wins).
    pub fn paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(2);

        if !self.has_default_file() {
            return Err(Error::Config(format!("'{DEFAULT_FILE}' does not exist")));
        }
        paths.push(self.root.join(DEFAULT_FILE));

        if let Some(env_name) = (self.env)(ENV_SELECTOR) {
            let overlay = format!("config/config.{env_name}");
            let overlay_path = self.root.join(&overlay);
            if !is_regular_file(&overlay_path) {
                return Err(Error::Config(format!(
                    "'{overlay}' does not exist, check your {ENV_SELECTOR} value"
                )));
            }
            paths.push(overlay_path);
        }

        Ok(paths)
    }

    /// Populate `dest` from the configuration layers.
    ///
    /// Fields that no file mentions keep the value they had in `dest`.
    pub fn load_into<T>(&self, dest: &mut T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + ExpandEnv,
    {
        let mut merged = serde_yaml::to_value(&*dest)?;
        for path in self.paths()? {
            log::debug!("Reading configuration layer {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                continue;
            }
            let layer: Value = serde_yaml::from_str(&content)?;
            merge(&mut merged, layer);
        }

        let mut loaded: T = serde_yaml::from_value(merged)?;
        loaded.expand_env(&*self.env);
        *dest = loaded;
        Ok(())
    }

    /// Load a fresh `T`, starting from `T::default()`.
    pub fn load<T>(&self) -> Result<T>
    where
        T: Default + Serialize + DeserializeOwned + ExpandEnv,
    {
        let mut conf = T::default();
        self.load_into(&mut conf)?;
        Ok(conf)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        ConfigLoader::new(".")
    }
}

/// [`ConfigLoader::paths`] relative to the current directory.
pub fn paths() -> Result<Vec<PathBuf>> {
    ConfigLoader::default().paths()
}

/// [`ConfigLoader::load_into`] relative to the current directory.
pub fn load_into<T>(dest: &mut T) -> Result<()>
where
    T: Serialize + DeserializeOwned + ExpandEnv,
{
    ConfigLoader::default().load_into(dest)
}

/// [`ConfigLoader::load`] relative to the current directory.
pub fn load<T>() -> Result<T>
where
    T: Default + Serialize + DeserializeOwned + ExpandEnv,
{
    ConfigLoader::default().load()
}

/// Symlinks do not count.
fn is_regular_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// Overlay `layer` onto `base`: mappings merge key by key, anything else replaces.
/// An empty document leaves `base` untouched.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(layer_map)) => {
            for (key, value) in layer_map {
                let nested = value.is_mapping()
                    && base_map.get(&key).map_or(false, Value::is_mapping);
                match base_map.get_mut(&key) {
                    Some(existing) if nested => merge(existing, value),
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize, Deserialize, ExpandEnv)]
    struct TestConf {
        verbose: bool,
        jobs: i64,
        endpoint: String,
    }

    #[derive(Debug, Default, Serialize, Deserialize, ExpandEnv)]
    struct PostgresConf {
        endpoint: String,
        debug: bool,
    }

    #[derive(Debug, Default, Serialize, Deserialize, ExpandEnv)]
    struct TestConfNested {
        verbose: bool,
        jobs: i64,
        postgres: PostgresConf,
        #[expand_env(skip)]
        raw: String,
        tags: Vec<String>,
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn setup_config_dir() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        tmp
    }

    fn write(tmp: &TempDir, name: &str, content: &str) {
        std::fs::write(tmp.path().join("config").join(name), content).unwrap();
    }

    #[test]
    fn test_paths_without_config_dir() {
        let tmp = TempDir::new().unwrap();
        let loader = ConfigLoader::new(tmp.path()).with_env(env_of(&[]));

        let err = loader.paths().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
        assert!(err.to_string().contains("config/config.default"));
    }

    #[test]
    fn test_paths_default_only() {
        let tmp = setup_config_dir();
        write(&tmp, "config.default", "");
        let loader = ConfigLoader::new(tmp.path()).with_env(env_of(&[]));

        let paths = loader.paths().unwrap();
        assert_eq!(paths, vec![tmp.path().join("config/config.default")]);
    }

    #[test]
    fn test_paths_with_missing_overlay() {
        let tmp = setup_config_dir();
        write(&tmp, "config.default", "");
        let loader = ConfigLoader::new(tmp.path()).with_env(env_of(&[("APP_ENV", "aws")]));

        let err = loader.paths().unwrap_err();
        assert!(err.to_string().contains("config/config.aws"), "got {err}");
        assert!(err.to_string().contains("APP_ENV"));
    }

    #[test]
    fn test_paths_with_overlay() {
        let tmp = setup_config_dir();
        write(&tmp, "config.default", "");
        write(&tmp, "config.aws", "");
        let loader = ConfigLoader::new(tmp.path()).with_env(env_of(&[("APP_ENV", "aws")]));

        let paths = loader.paths().unwrap();
        assert_eq!(
            paths,
            vec![
                tmp.path().join("config/config.default"),
                tmp.path().join("config/config.aws"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_default_is_ignored() {
        let tmp = setup_config_dir();
        write(&tmp, "real.yaml", "jobs: 1\n");
        std::os::unix::fs::symlink(
            tmp.path().join("config/real.yaml"),
            tmp.path().join("config/config.default"),
        )
        .unwrap();
        let loader = ConfigLoader::new(tmp.path()).with_env(env_of(&[]));

        assert!(!loader.has_default_file());
        assert!(loader.paths().is_err());
    }

    #[test]
    fn test_load_single_file() {
        let tmp = setup_config_dir();
        write(
            &tmp,
            "config.default",
            "verbose: true\njobs: 42\nendpoint: ${ENDPOINT}\n",
        );

        let conf: TestConf = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[]))
            .load()
            .unwrap();
        assert!(conf.verbose);
        assert_eq!(conf.jobs, 42);
        assert_eq!(conf.endpoint, "");

        let conf: TestConf = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[("ENDPOINT", "end://point")]))
            .load()
            .unwrap();
        assert_eq!(conf.jobs, 42);
        assert_eq!(conf.endpoint, "end://point");
    }

    #[test]
    fn test_overlay_wins() {
        let tmp = setup_config_dir();
        write(
            &tmp,
            "config.default",
            "verbose: true\njobs: 42\nendpoint: ${ENDPOINT}\n",
        );
        write(&tmp, "config.unittest", "jobs: 11\n");

        let without_env: TestConf = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[]))
            .load()
            .unwrap();
        assert_eq!(without_env.jobs, 42);

        let conf: TestConf = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[("APP_ENV", "unittest"), ("ENDPOINT", "end://point")]))
            .load()
            .unwrap();
        assert_eq!(conf.jobs, 11);
        // Untouched by the overlay
        assert!(conf.verbose);
        assert_eq!(conf.endpoint, "end://point");
    }

    #[test]
    fn test_load_into_keeps_unmentioned_fields() {
        let tmp = setup_config_dir();
        write(&tmp, "config.default", "jobs: 3\n");

        let mut conf = TestConf {
            verbose: true,
            jobs: 0,
            endpoint: "kept".into(),
        };
        ConfigLoader::new(tmp.path())
            .with_env(env_of(&[]))
            .load_into(&mut conf)
            .unwrap();
        assert!(conf.verbose);
        assert_eq!(conf.jobs, 3);
        assert_eq!(conf.endpoint, "kept");
    }

    #[test]
    fn test_load_nested() {
        let tmp = setup_config_dir();
        write(
            &tmp,
            "config.default",
            "verbose: false\njobs: 1\npostgres:\n  endpoint: ${ENDPOINT}\n  debug: true\nraw: $ENDPOINT\ntags: [$ENDPOINT]\n",
        );
        write(&tmp, "config.unittest", "postgres:\n  debug: false\n");

        let conf: TestConfNested = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[("ENDPOINT", "://point"), ("APP_ENV", "unittest")]))
            .load()
            .unwrap();
        assert_eq!(conf.postgres.endpoint, "://point");
        // Nested mappings merge instead of replacing each other
        assert!(!conf.postgres.debug);
        assert_eq!(conf.raw, "$ENDPOINT");
        assert_eq!(conf.tags, vec!["$ENDPOINT".to_string()]);
    }

    #[test]
    fn test_load_rejects_wrong_types() {
        let tmp = setup_config_dir();
        write(&tmp, "config.default", "jobs: many\n");

        let result: Result<TestConf> = ConfigLoader::new(tmp.path())
            .with_env(env_of(&[]))
            .load();
        assert!(matches!(result, Err(Error::Yaml(_))));
    }

    #[test]
    fn test_merge_replaces_scalars_and_sequences() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb: [1, 2]\nc: {d: 1, e: 2}").unwrap();
        let layer: Value = serde_yaml::from_str("b: [3]\nc: {e: 5}\nf: new").unwrap();
        merge(&mut base, layer);

        let expected: Value =
            serde_yaml::from_str("a: 1\nb: [3]\nc: {d: 1, e: 5}\nf: new").unwrap();
        assert_eq!(base, expected);
    }
}
