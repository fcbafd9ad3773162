//! Node/TypeScript collaborators: `tsc` diagnostics and npm-family package
//! upgrades.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use bumpfix_core::{BuildError, PackageUpgrade};

use crate::error::EngineError;
use crate::services::{BuildService, PackageService};

static TSC_DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>.+?)\((?P<line>\d+),(?P<column>\d+)\): error (?P<code>TS\d+): (?P<message>.*)$")
        .expect("valid tsc diagnostic regex")
});

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Runs `npx tsc --noEmit --pretty false` in the project root.
#[derive(Debug, Clone, Copy, Default)]
pub struct TscBuildService;

#[async_trait]
impl BuildService for TscBuildService {
    async fn get_errors(&self, project_root: &Path) -> Result<Vec<BuildError>, EngineError> {
        let output = run(
            "npx",
            &["tsc", "--noEmit", "--pretty", "false"],
            project_root,
        )
        .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let errors = parse_tsc_output(&stdout);

        if !output.status.success() && errors.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::command(
                "npx tsc",
                format!("{} {}", output.status, stderr.trim()),
            ));
        }
        tracing::debug!(count = errors.len(), "tsc diagnostics collected");
        Ok(errors)
    }
}

/// Parses `file(line,col): error TSxxxx: message` lines. Indented lines
/// continue the previous message. Diagnostics under `node_modules` are
/// dropped.
pub fn parse_tsc_output(output: &str) -> Vec<BuildError> {
    let mut errors: Vec<BuildError> = Vec::new();
    let mut keep_last = false;

    for line in output.lines() {
        if let Some(caps) = TSC_DIAGNOSTIC.captures(line) {
            let path = PathBuf::from(&caps["path"]);
            keep_last = !path
                .components()
                .any(|c| c.as_os_str() == "node_modules");
            if !keep_last {
                continue;
            }
            errors.push(BuildError {
                path,
                line: caps["line"].parse().unwrap_or_default(),
                column: caps["column"].parse().unwrap_or_default(),
                message: format!("{}: {}", &caps["code"], &caps["message"]),
            });
        } else if keep_last && line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
            if let Some(last) = errors.last_mut() {
                last.message.push('\n');
                last.message.push_str(line.trim());
            }
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }
}

/// Finds the package manager by lockfile, walking up from `project_root`
/// and stopping at the first directory containing `.git`. Defaults to npm.
pub async fn detect_package_manager(project_root: &Path) -> PackageManager {
    const LOCKFILES: [(&str, PackageManager); 3] = [
        ("package-lock.json", PackageManager::Npm),
        ("yarn.lock", PackageManager::Yarn),
        ("pnpm-lock.yaml", PackageManager::Pnpm),
    ];

    for dir in project_root.ancestors() {
        for (lockfile, manager) in LOCKFILES {
            if exists(&dir.join(lockfile)).await {
                return manager;
            }
        }
        if exists(&dir.join(".git")).await {
            break;
        }
    }
    PackageManager::Npm
}

/// Upgrades through `package.json` and the detected package manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmPackageService;

#[derive(Debug, Deserialize)]
struct OutdatedEntry {
    current: Option<String>,
    latest: Option<String>,
    #[serde(rename = "type")]
    dependency_type: Option<String>,
}

#[async_trait]
impl PackageService for NpmPackageService {
    async fn list(&self, project_root: &Path) -> Result<Vec<PackageUpgrade>, EngineError> {
        // `npm outdated` exits 1 whenever something is outdated.
        let output = run("npm", &["outdated", "--json", "--long"], project_root).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_outdated(&stdout)
    }

    async fn apply(
        &self,
        project_root: &Path,
        upgrade: &PackageUpgrade,
    ) -> Result<PackageUpgrade, EngineError> {
        let manifest_path = project_root.join("package.json");
        let raw = tokio::fs::read_to_string(&manifest_path).await?;
        let updated = set_dependency_version(&raw, upgrade)?;
        tokio::fs::write(&manifest_path, updated).await?;

        let manager = detect_package_manager(project_root).await;
        tracing::info!(
            package = %upgrade.package_name,
            version = %upgrade.new_version,
            manager = manager.command(),
            "installing upgraded package"
        );
        let output = run(manager.command(), &["install"], project_root).await?;
        if !output.status.success() {
            return Err(EngineError::command(
                format!("{} install", manager.command()),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(upgrade.clone())
    }
}

/// Keeps production dependencies whose latest major differs from the
/// current one, skipping `@types/` packages.
pub fn parse_outdated(json: &str) -> Result<Vec<PackageUpgrade>, EngineError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: indexmap::IndexMap<String, OutdatedEntry> = serde_json::from_str(json)?;

    Ok(entries
        .into_iter()
        .filter(|(name, _)| !name.starts_with("@types/"))
        .filter(|(_, entry)| {
            entry
                .dependency_type
                .as_deref()
                .map_or(true, |t| t == "dependencies")
        })
        .filter_map(|(name, entry)| {
            let current = major_version(entry.current.as_deref()?)?;
            let latest_raw = entry.latest?;
            let latest = major_version(&latest_raw)?;
            (current != latest).then(|| PackageUpgrade {
                package_name: name,
                new_version: latest_raw,
            })
        })
        .collect())
}

/// Rewrites the version of `upgrade.package_name` under `dependencies`,
/// keeping key order. Adds the entry if absent.
pub fn set_dependency_version(
    manifest: &str,
    upgrade: &PackageUpgrade,
) -> Result<String, EngineError> {
    let mut value: Value = serde_json::from_str(manifest)?;
    let root = value.as_object_mut().ok_or_else(|| {
        EngineError::Config("package.json is not a JSON object".to_string())
    })?;
    let dependencies = root
        .entry("dependencies")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Some(dependencies) = dependencies.as_object_mut() else {
        return Err(EngineError::Config(
            "package.json dependencies is not an object".to_string(),
        ));
    };
    dependencies.insert(
        upgrade.package_name.clone(),
        Value::String(upgrade.new_version.clone()),
    );

    let mut out = serde_json::to_string_pretty(&value)?;
    out.push('\n');
    Ok(out)
}

fn major_version(version: &str) -> Option<u64> {
    let trimmed = version.trim_start_matches(|c: char| !c.is_ascii_digit());
    let major: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    major.parse().ok()
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn run(program: &str, args: &[&str], cwd: &Path) -> Result<Output, EngineError> {
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|err| EngineError::command(format!("{} {}", program, args.join(" ")), err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tsc_diagnostics_and_drops_node_modules() {
        let output = "\
src/app.ts(12,5): error TS2339: Property 'oldFn' does not exist on type 'Lib'.
node_modules/lib/index.d.ts(3,1): error TS1005: ';' expected.
  this continuation belongs to the dropped diagnostic
src/util.ts(1,10): error TS2305: Module '\"lib\"' has no exported member 'gone'.
  Did you mean 'kept'?
Found 3 errors.
";
        let errors = parse_tsc_output(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, PathBuf::from("src/app.ts"));
        assert_eq!(errors[0].line, 12);
        assert_eq!(errors[0].column, 5);
        assert!(errors[0].message.starts_with("TS2339: Property 'oldFn'"));
        assert_eq!(errors[1].path, PathBuf::from("src/util.ts"));
        assert!(errors[1].message.ends_with("\nDid you mean 'kept'?"));
    }

    #[test]
    fn outdated_keeps_major_bumps_only() {
        let json = r#"{
            "glob": {"current": "8.1.0", "wanted": "8.1.0", "latest": "10.3.10", "type": "dependencies"},
            "lodash": {"current": "4.17.20", "wanted": "4.17.21", "latest": "4.17.21", "type": "dependencies"},
            "@types/node": {"current": "18.0.0", "latest": "20.1.0", "type": "dependencies"},
            "jest": {"current": "28.0.0", "latest": "29.7.0", "type": "devDependencies"},
            "missing": {"wanted": "1.0.0", "latest": "2.0.0", "type": "dependencies"}
        }"#;
        let upgrades = parse_outdated(json).unwrap();
        assert_eq!(
            upgrades,
            vec![PackageUpgrade {
                package_name: "glob".into(),
                new_version: "10.3.10".into(),
            }]
        );
        assert!(parse_outdated("").unwrap().is_empty());
    }

    #[test]
    fn manifest_rewrite_keeps_key_order() {
        let manifest = r#"{
  "name": "app",
  "dependencies": {
    "alpha": "^1.0.0",
    "glob": "^8.1.0",
    "zeta": "^3.0.0"
  },
  "scripts": {}
}"#;
        let upgrade = PackageUpgrade {
            package_name: "glob".into(),
            new_version: "^10.3.10".into(),
        };
        let updated = set_dependency_version(manifest, &upgrade).unwrap();
        let alpha = updated.find("\"alpha\"").unwrap();
        let glob = updated.find("\"glob\": \"^10.3.10\"").unwrap();
        let zeta = updated.find("\"zeta\"").unwrap();
        assert!(alpha < glob && glob < zeta);
        assert!(updated.find("\"name\"").unwrap() < updated.find("\"scripts\"").unwrap());
    }

    #[test]
    fn major_version_coerces_ranges() {
        assert_eq!(major_version("^8.1.0"), Some(8));
        assert_eq!(major_version("~10"), Some(10));
        assert_eq!(major_version("v3.2"), Some(3));
        assert_eq!(major_version("latest"), None);
    }

    #[tokio::test]
    async fn detects_package_manager_by_lockfile() {
        let repo = tempfile::tempdir().unwrap();
        let app = repo.path().join("packages/app");
        tokio::fs::create_dir_all(&app).await.unwrap();
        tokio::fs::create_dir(repo.path().join(".git")).await.unwrap();
        assert_eq!(detect_package_manager(&app).await, PackageManager::Npm);

        tokio::fs::write(repo.path().join("pnpm-lock.yaml"), "").await.unwrap();
        assert_eq!(detect_package_manager(&app).await, PackageManager::Pnpm);

        tokio::fs::write(app.join("yarn.lock"), "").await.unwrap();
        assert_eq!(detect_package_manager(&app).await, PackageManager::Yarn);
    }

    #[tokio::test]
    async fn detection_stops_at_repository_root() {
        let outer = tempfile::tempdir().unwrap();
        tokio::fs::write(outer.path().join("yarn.lock"), "").await.unwrap();
        let repo = outer.path().join("repo");
        tokio::fs::create_dir_all(repo.join(".git")).await.unwrap();
        assert_eq!(detect_package_manager(&repo).await, PackageManager::Npm);
    }
}
