//! Layered configuration loader
//!
//! Precedence, lowest to highest: struct defaults, environment variables,
//! TOML files, then flags given on the command line. A flag that was not
//! passed never overrides anything, even though clap still reports its
//! default.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::builder::BoolishValueParser;
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::{Map, Number, Value};
use tracing::{debug, error, info, warn};

use super::resolved::{load_toml_file, ConfigError, ConfigSource, Layer, ResolvedConfig};
use super::schema::{self, ConfigSchema, FieldKind, FieldSpec};

const TARGET: &str = "ops_toolkit::config";

/// File loaded when neither `--config` nor `CONFIG` is set
pub const DEFAULT_CONFIG: &str = "config.toml";

/// Flag listing config files; also ignored as a key inside files
pub const CONFIG_KEY: &str = "config";

/// Environment variable listing config files (comma separated)
pub const CONFIG_ENV: &str = "CONFIG";

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Map(HashMap<String, String>),
}

/// Builder for one configuration load.
///
/// [`ConfigLoader::from_process`] reads the real argv and environment;
/// everything can be replaced for embedding or tests.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    program: String,
    args: Vec<OsString>,
    env: EnvSource,
    search_dirs: Option<Vec<PathBuf>>,
    default_file: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            program: env!("CARGO_PKG_NAME").to_string(),
            args: Vec::new(),
            env: EnvSource::Process,
            search_dirs: None,
            default_file: DEFAULT_CONFIG.to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader over the process argv and environment
    pub fn from_process() -> Self {
        let mut argv = std::env::args_os();
        let mut loader = Self::default();
        if let Some(name) = argv
            .next()
            .as_deref()
            .and_then(|arg0| Path::new(arg0).file_name())
        {
            loader.program = name.to_string_lossy().into_owned();
        }
        loader.args = argv.collect();
        loader
    }

    /// Program name shown in usage output
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program = name.into();
        self
    }

    /// Command-line arguments, without the binary name
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Read environment variables from `vars` instead of the process
    pub fn env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Map(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Directories probed for relative config paths.
    ///
    /// Defaults to the working directory, then the executable's directory.
    pub fn search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_dirs = Some(dirs.into_iter().map(Into::into).collect());
        self
    }

    /// File name used when no config list is given
    pub fn default_file(mut self, name: impl Into<String>) -> Self {
        self.default_file = name.into();
        self
    }

    /// Resolve `config` from all layers, overwriting it in place.
    ///
    /// On error `config` is left untouched.
    pub fn load<T: ConfigSchema>(&self, config: &mut T) -> Result<ResolvedConfig, ConfigError> {
        let fields = T::fields();
        schema::validate(&fields)?;

        let mut base = default_object(&*config, &fields)?;
        let command = self.command(&fields, &base);

        let mut store = Map::new();
        let mut origins = BTreeMap::new();
        let mut sources = vec![ConfigSource::layer(Layer::Defaults)];

        // Layer 1: defaults
        for field in &fields {
            if let Some(default) = base.get(&field.key) {
                store.insert(field.key.clone(), default.clone());
                origins.insert(field.key.clone(), Layer::Defaults);
            }
        }

        // Layer 2: environment
        let mut env_hit = false;
        for field in &fields {
            if let Some(value) = self.env_var(&field.env_var()) {
                debug!(target: TARGET, var = %field.env_var(), key = %field.key, "environment override");
                store.insert(field.key.clone(), Value::String(value));
                origins.insert(field.key.clone(), Layer::Environment);
                env_hit = true;
            }
        }
        if env_hit {
            sources.push(ConfigSource::layer(Layer::Environment));
        }

        let matches = command.try_get_matches_from(self.args.iter().cloned())?;

        // Layer 3: files
        for candidate in self.config_files(&matches) {
            let path = self.resolve_path(&candidate);
            if !path.is_file() {
                if candidate == self.default_file {
                    info!(target: TARGET, file = %path.display(), "config file not found, skipping");
                } else {
                    warn!(target: TARGET, file = %path.display(), "config file not found or not a regular file, skipping");
                }
                continue;
            }

            let (mut table, digest) = load_toml_file(&path)?;
            table.remove(CONFIG_KEY);
            debug!(target: TARGET, file = %path.display(), keys = table.len(), "loaded config file");

            for (key, value) in table {
                if !fields.iter().any(|f| f.key == key) {
                    debug!(target: TARGET, key = %key, file = %path.display(), "ignoring unknown config key");
                    continue;
                }
                store.insert(key.clone(), value);
                origins.insert(key, Layer::File);
            }
            sources.push(ConfigSource::file(path, digest));
        }

        // Layer 4: flags actually passed
        let mut cli_hit = false;
        for field in &fields {
            if matches.value_source(&field.key) != Some(ValueSource::CommandLine) {
                continue;
            }
            if let Some(value) = flag_value(&matches, field)? {
                store.insert(field.key.clone(), value);
                origins.insert(field.key.clone(), Layer::CommandLine);
                cli_hit = true;
            }
        }
        if cli_hit {
            sources.push(ConfigSource::layer(Layer::CommandLine));
        }

        // Project onto the struct
        let mut values = Map::new();
        for field in &fields {
            if let Some(value) = store.get(&field.key) {
                let coerced = schema::coerce(field, value)?;
                base.insert(field.key.clone(), coerced.clone());
                values.insert(field.key.clone(), coerced);
            }
        }
        *config = serde_json::from_value(Value::Object(base))?;

        let resolved = ResolvedConfig {
            values,
            origins,
            sources,
        };
        resolved.dump();
        Ok(resolved)
    }

    /// [`load`](Self::load), logging and exiting the process on failure
    pub fn load_or_exit<T: ConfigSchema>(&self, config: &mut T) -> ResolvedConfig {
        match self.load(config) {
            Ok(resolved) => resolved,
            Err(ConfigError::Cli(err)) => {
                if err.use_stderr() {
                    error!(target: TARGET, kind = %err.kind(), "invalid command line");
                }
                err.exit()
            }
            Err(err) => {
                error!(target: TARGET, error = %err, "failed to load configuration");
                std::process::exit(1)
            }
        }
    }

    fn env_var(&self, name: &str) -> Option<String> {
        match &self.env {
            EnvSource::Process => std::env::var(name).ok(),
            EnvSource::Map(vars) => vars.get(name).cloned(),
        }
    }

    /// Config list: `--config` if passed, else `CONFIG`, else the default file
    fn config_files(&self, matches: &ArgMatches) -> Vec<String> {
        if matches.value_source(CONFIG_KEY) == Some(ValueSource::CommandLine) {
            return matches
                .get_many::<String>(CONFIG_KEY)
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
        }

        if let Some(list) = self.env_var(CONFIG_ENV) {
            let files: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !files.is_empty() {
                return files;
            }
        }

        vec![self.default_file.clone()]
    }

    fn resolve_path(&self, candidate: &str) -> PathBuf {
        let path = PathBuf::from(candidate);
        if path.is_absolute() {
            return path;
        }

        for dir in self.search_dir_list() {
            let joined = dir.join(&path);
            if joined.is_file() {
                return joined;
            }
        }
        path
    }

    fn search_dir_list(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.search_dirs {
            return dirs.clone();
        }

        let mut dirs = Vec::with_capacity(2);
        match std::env::current_dir() {
            Ok(cwd) => dirs.push(cwd),
            Err(e) => warn!(target: TARGET, error = %e, "cannot determine working directory"),
        }
        match std::env::current_exe() {
            Ok(exe) => {
                if let Some(parent) = exe.parent() {
                    dirs.push(parent.to_path_buf());
                }
            }
            Err(e) => warn!(target: TARGET, error = %e, "cannot determine executable directory"),
        }
        dirs
    }

    fn command(&self, fields: &[FieldSpec], defaults: &Map<String, Value>) -> Command {
        let mut command = Command::new(self.program.clone())
            .no_binary_name(true)
            .arg(
                Arg::new(CONFIG_KEY)
                    .long(CONFIG_KEY)
                    .value_name("FILE")
                    .action(ArgAction::Append)
                    .value_delimiter(',')
                    .default_value(self.default_file.clone())
                    .help("path to one or more .toml config files"),
            );

        for field in fields {
            let default = defaults.get(&field.key).map(flag_default).unwrap_or_default();
            let arg = Arg::new(field.key.clone())
                .long(field.key.clone())
                .help(field.usage.clone())
                .action(ArgAction::Set)
                .default_value(default);

            let arg = match field.kind {
                FieldKind::String => arg.value_name("STRING").value_parser(value_parser!(String)),
                FieldKind::Integer => arg
                    .value_name("INT")
                    .value_parser(value_parser!(i64))
                    .allow_negative_numbers(true),
                FieldKind::Float => arg
                    .value_name("FLOAT")
                    .value_parser(value_parser!(f64))
                    .allow_negative_numbers(true),
                FieldKind::Boolean => arg
                    .value_parser(BoolishValueParser::new())
                    .num_args(0..=1)
                    .require_equals(true)
                    .default_missing_value("true"),
            };
            command = command.arg(arg);
        }

        command
    }
}

/// Resolve `config` from the process argv and environment.
///
/// Logs and exits on any error: schema problems, bad flags, unreadable or
/// malformed files, and values that do not fit their field.
pub fn load_config<T: ConfigSchema>(config: &mut T) -> ResolvedConfig {
    ConfigLoader::from_process().load_or_exit(config)
}

/// Serialize the defaults and check every field is backed by a value
fn default_object<T: ConfigSchema>(
    config: &T,
    fields: &[FieldSpec],
) -> Result<Map<String, Value>, ConfigError> {
    let value =
        serde_json::to_value(config).map_err(|e| ConfigError::schema("<config>", e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ConfigError::schema(
            "<config>",
            "config must serialize to a struct",
        ));
    };

    for field in fields {
        let default = object.get(&field.key).ok_or_else(|| {
            ConfigError::schema(
                &field.ident,
                format!("lookup key '{}' is not a serialized field", field.key),
            )
        })?;
        if !field.kind.accepts_default(default) {
            return Err(ConfigError::schema(
                &field.ident,
                format!("unsupported type: declared {}, default is {}", field.kind.name(), default),
            ));
        }
    }

    Ok(object)
}

fn flag_default(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flag_value(matches: &ArgMatches, field: &FieldSpec) -> Result<Option<Value>, ConfigError> {
    let value = match field.kind {
        FieldKind::String => matches
            .get_one::<String>(&field.key)
            .map(|s| Value::String(s.clone())),
        FieldKind::Integer => matches.get_one::<i64>(&field.key).map(|i| Value::from(*i)),
        FieldKind::Float => match matches.get_one::<f64>(&field.key) {
            Some(f) => {
                // JSON has no NaN or infinity
                let number = Number::from_f64(*f).ok_or_else(|| ConfigError::Coerce {
                    key: field.key.clone(),
                    expected: field.kind.name(),
                    value: f.to_string(),
                })?;
                Some(Value::Number(number))
            }
            None => None,
        },
        FieldKind::Boolean => matches.get_one::<bool>(&field.key).map(|b| Value::Bool(*b)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        age: i64,
        ratio: f64,
        verbose: bool,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default-name".to_string(),
                age: 18,
                ratio: 0.5,
                verbose: false,
            }
        }
    }

    impl ConfigSchema for Sample {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::string("name").usage("display name"),
                FieldSpec::integer("age").usage("age in years"),
                FieldSpec::float("ratio"),
                FieldSpec::boolean("verbose"),
            ]
        }
    }

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new()
            .search_dirs([dir.path()])
            .env_vars(Vec::<(String, String)>::new())
    }

    #[test]
    fn test_defaults_only() {
        let dir = TempDir::new().unwrap();
        let mut config = Sample::default();

        let resolved = loader(&dir).load(&mut config).unwrap();

        assert_eq!(config, Sample::default());
        assert_eq!(resolved.origin("name"), Some(Layer::Defaults));
        assert_eq!(resolved.files().count(), 0);
    }

    #[test]
    fn test_flag_not_passed_keeps_lower_layer() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "age = 20\n").unwrap();

        let mut config = Sample::default();
        loader(&dir).args(["--name=cli"]).load(&mut config).unwrap();

        assert_eq!(config.name, "cli");
        assert_eq!(config.age, 20);
    }

    #[test]
    fn test_bool_flag_forms() {
        let dir = TempDir::new().unwrap();

        let mut config = Sample::default();
        loader(&dir).args(["--verbose"]).load(&mut config).unwrap();
        assert!(config.verbose);

        let mut config = Sample {
            verbose: true,
            ..Sample::default()
        };
        loader(&dir).args(["--verbose=false"]).load(&mut config).unwrap();
        assert!(!config.verbose);
    }

    #[test]
    fn test_env_coercion() {
        let dir = TempDir::new().unwrap();
        let mut config = Sample::default();

        let resolved = loader(&dir)
            .env_vars([("AGE", "42"), ("RATIO", "1.25"), ("VERBOSE", "1")])
            .load(&mut config)
            .unwrap();

        assert_eq!(config.age, 42);
        assert_eq!(config.ratio, 1.25);
        assert!(config.verbose);
        assert_eq!(resolved.origin("age"), Some(Layer::Environment));
    }

    #[test]
    fn test_bad_env_value_leaves_config_untouched() {
        let dir = TempDir::new().unwrap();
        let mut config = Sample::default();

        let err = loader(&dir)
            .env_vars([("AGE", "old")])
            .load(&mut config)
            .unwrap_err();

        assert!(matches!(err, ConfigError::Coerce { .. }));
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn test_unknown_flag_is_cli_error() {
        let dir = TempDir::new().unwrap();
        let mut config = Sample::default();

        let err = loader(&dir).args(["--nope"]).load(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::Cli(_)));
    }

    #[test]
    fn test_non_finite_float_flag_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), "ratio = 0.75\n").unwrap();

        for flag in ["--ratio=NaN", "--ratio=inf"] {
            let mut config = Sample::default();
            let err = loader(&dir).args([flag]).load(&mut config).unwrap_err();

            assert!(
                matches!(err, ConfigError::Coerce { ref key, .. } if key == "ratio"),
                "{flag}: {err}"
            );
            assert_eq!(config, Sample::default());
        }
    }

    #[test]
    fn test_config_key_in_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "config = \"other.toml\"\nname = \"file\"\n",
        )
        .unwrap();

        let mut config = Sample::default();
        let resolved = loader(&dir).load(&mut config).unwrap();

        assert_eq!(config.name, "file");
        assert_eq!(resolved.files().count(), 1);
    }

    #[test]
    fn test_env_config_list_is_trimmed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.toml"), "name = \"a\"\nage = 1\n").unwrap();
        fs::write(dir.path().join("b.toml"), "name = \"b\"\n").unwrap();

        let mut config = Sample::default();
        loader(&dir)
            .env_vars([("CONFIG", " a.toml , ,b.toml ")])
            .load(&mut config)
            .unwrap();

        assert_eq!(config.name, "b");
        assert_eq!(config.age, 1);
    }

    #[test]
    fn test_schema_key_must_be_serialized() {
        #[derive(Serialize, Deserialize)]
        struct Broken {
            name: String,
        }

        impl ConfigSchema for Broken {
            fn fields() -> Vec<FieldSpec> {
                vec![FieldSpec::string("title")]
            }
        }

        let dir = TempDir::new().unwrap();
        let mut config = Broken {
            name: "x".to_string(),
        };
        let err = loader(&dir).load(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn test_unsupported_field_type() {
        #[derive(Serialize, Deserialize)]
        struct Listy {
            peers: Vec<String>,
        }

        impl ConfigSchema for Listy {
            fn fields() -> Vec<FieldSpec> {
                vec![FieldSpec::string("peers")]
            }
        }

        let dir = TempDir::new().unwrap();
        let mut config = Listy { peers: Vec::new() };
        let err = loader(&dir).load(&mut config).unwrap_err();
        assert!(err.to_string().contains("unsupported type"));
    }
}
