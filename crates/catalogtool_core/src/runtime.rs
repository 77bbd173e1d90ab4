use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `catalogtool db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".catalogtool";
pub const DB_FILENAME: &str = "catalog.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})\npolicy={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            MIGRATIONS_POLICY_MESSAGE
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let state_dir_exists = paths.state_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `catalogtool init` first"
        ));
    }
    if !db_exists {
        warnings.push(format!(
            "{} does not exist yet. {MIGRATIONS_POLICY_MESSAGE}",
            normalize_for_display(&paths.db_path)
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        state_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_override(
        overrides.project_root.as_deref(),
        lookup_env("CATALOGTOOL_PROJECT_ROOT"),
        &context.cwd,
    )
    .unwrap_or_else(|| detect_project_root(&context.cwd));
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) = resolve_override(
        overrides.data_dir.as_deref(),
        lookup_env("CATALOGTOOL_DATA_DIR"),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));

    let (config_path, config_source) = resolve_override(
        overrides.config.as_deref(),
        lookup_env("CATALOGTOOL_CONFIG"),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join("config.toml"), ValueSource::Default));

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

/// Flag beats env; relative values are taken against `base`. Blank env values are ignored.
fn resolve_override(
    flag: Option<&Path>,
    env_value: Option<String>,
    base: &Path,
) -> Option<(PathBuf, ValueSource)> {
    if let Some(path) = flag {
        return Some((absolutize(path, base), ValueSource::Flag));
    }
    env_value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (absolutize(Path::new(&value), base), ValueSource::Env))
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();

    for dir in [&paths.state_dir, &paths.data_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.to_path_buf());
        }
    }

    let wrote_config = if options.materialize_config {
        write_config_file(
            &paths.config_path,
            &render_materialized_config(paths),
            options.force,
        )?
    } else {
        false
    };

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let db_path = normalize_for_display(&paths.db_path);
    format!(
        "# catalogtool runtime configuration (materialized by `catalogtool init`)\n# database: {db_path}\n# {MIGRATIONS_POLICY_MESSAGE}\n\n[reconcile]\n# Records fetched per traversal page.\npage_size = {}\n# \"continue\" records a failed record and moves on; \"abort\" stops the run.\non_error = \"continue\"\n",
        crate::config::DEFAULT_PAGE_SIZE
    )
}

/// Nearest ancestor of `cwd` that already holds a state dir, else `cwd` itself.
fn detect_project_root(cwd: &Path) -> (PathBuf, ValueSource) {
    cwd.ancestors()
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(|root| (root.to_path_buf(), ValueSource::Heuristic))
        .unwrap_or_else(|| (cwd.to_path_buf(), ValueSource::Default))
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_config_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, STATE_DIR_NAME, ValueSource, init_layout,
        inspect_runtime, resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
        };

        let env = HashMap::from([(
            "CATALOGTOOL_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(
            resolved.db_path,
            from_flag.join(STATE_DIR_NAME).join("data").join("catalog.db")
        );
    }

    #[test]
    fn resolve_paths_uses_env_data_dir_relative_to_project() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext {
            cwd: root.clone(),
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([("CATALOGTOOL_DATA_DIR".to_string(), "var/db".to_string())]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.data_dir, root.join("var").join("db"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn blank_env_override_falls_back_to_default() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext { cwd: root.clone() };
        let env = HashMap::from([("CATALOGTOOL_CONFIG".to_string(), "  ".to_string())]);

        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), |key| {
                env.get(key).cloned()
            })
            .expect("resolve paths");
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(resolved.config_source, ValueSource::Default);
        assert_eq!(
            resolved.config_path,
            root.join(STATE_DIR_NAME).join("config.toml")
        );
    }

    #[test]
    fn resolve_paths_detects_state_dir_in_ancestor() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("a").join("b");
        fs::create_dir_all(root.join(STATE_DIR_NAME)).expect("create state dir");
        fs::create_dir_all(&nested).expect("create nested");

        let context = ResolutionContext { cwd: nested };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve paths");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_expected_dirs_and_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");

        assert!(!report.created_dirs.is_empty());
        assert!(report.wrote_config);
        assert!(paths.state_dir.exists());
        assert!(paths.data_dir.exists());
        let config = load_config(&paths.config_path).expect("materialized config parses");
        assert_eq!(config.reconcile.page_size, Some(100));

        let second = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(second.created_dirs.is_empty());
        assert!(!second.wrote_config);
    }

    #[test]
    fn inspect_runtime_warns_before_init() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");
        let context = ResolutionContext {
            cwd: root.clone(),
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let status = inspect_runtime(&paths).expect("inspect");
        assert!(status.project_root_exists);
        assert!(!status.state_dir_exists);
        assert!(!status.db_exists);
        assert_eq!(status.warnings.len(), 2);
    }
}
