//! End-to-end install lifecycle over a local git registry

mod common;

use std::path::Path;

use arm_core::config::ArmPaths;
use arm_core::error::ArmError;
use arm_core::lockfile::DependencyLock;
use arm_core::manifest::{DependencyConfig, PromptsetDependency, RulesetDependency};
use arm_core::registry::{GitRegistryConfig, RegistryConfig};
use arm_core::service::ArmService;
use arm_core::sink::{SinkConfig, Tool};
use common::{git_available, init_test_logging, GitRepo, REVIEW_PROMPTS, STYLE_V1, STYLE_V2};
use tempfile::TempDir;

struct Project {
    _temp: TempDir,
    repo: GitRepo,
    service: ArmService,
}

impl Project {
    fn work(&self) -> &Path {
        self.service.paths().working_dir()
    }

    fn exists(&self, relative: &str) -> bool {
        self.work().join(relative).exists()
    }
}

fn project() -> Project {
    init_test_logging();
    let repo = GitRepo::init();
    repo.write("style.yml", STYLE_V1)
        .write("prompts/review.yml", REVIEW_PROMPTS)
        .commit("first")
        .tag("v1.0.0");
    repo.write("style.yml", STYLE_V2).commit("second").tag("v1.1.0");
    repo.write("NOTES.md", "notes\n").commit("third").tag("v2.0.0");

    let temp = TempDir::new().unwrap();
    let work = temp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let service = ArmService::new(ArmPaths::new(&work, temp.path().join("home")));

    service
        .manifest()
        .add_registry(
            "ai",
            RegistryConfig::Git(GitRegistryConfig {
                url: repo.url(),
                branches: vec!["main".into()],
            }),
            false,
        )
        .unwrap();
    for (name, directory, tool) in [
        ("cursor", ".cursor/rules", Tool::Cursor),
        ("copilot", ".github/instructions", Tool::Copilot),
    ] {
        service
            .manifest()
            .add_sink(
                name,
                SinkConfig {
                    directory: directory.into(),
                    tool,
                },
                false,
            )
            .unwrap();
    }

    Project {
        _temp: temp,
        repo,
        service,
    }
}

fn ruleset(version: &str) -> RulesetDependency {
    RulesetDependency {
        version: version.into(),
        sinks: vec!["cursor".into(), "copilot".into()],
        include: vec!["style.yml".into()],
        exclude: vec![],
        priority: 100,
    }
}

const CURSOR_NAMING: &str = ".cursor/rules/arm/ai/style/style_naming.mdc";
const CURSOR_ERRORS: &str = ".cursor/rules/arm/ai/style/style_errors.mdc";
const COPILOT_ERRORS: &str = ".github/instructions/arm_ai_style_style_errors.instructions.md";

#[tokio::test]
async fn test_install_update_upgrade_uninstall() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();
    let service = &p.service;

    let installed = service
        .install_ruleset("ai", "style", ruleset("^1.0.0"))
        .await
        .unwrap();
    assert_eq!(installed.metadata.version.raw(), "v1.1.0");
    assert_eq!(installed.sinks, vec!["cursor", "copilot"]);
    assert!(p.exists(CURSOR_NAMING));
    assert!(p.exists(CURSOR_ERRORS));
    assert!(p.exists(COPILOT_ERRORS));

    let lock = service.lockfile().find_dependency_lock("ai", "style").unwrap().unwrap();
    assert_eq!(lock.version, "v1.1.0");
    assert_eq!(lock.lock.integrity, installed.integrity);
    assert_eq!(
        service.manifest().get_dependency("ai", "style").unwrap().version(),
        "^1.0.0"
    );

    // Nothing newer within ^1.0.0.
    let report = service.update_all().await.unwrap();
    assert_eq!(report.skipped, vec!["ai/style"]);
    assert!(report.succeeded.is_empty());

    let outdated = service.list_outdated().await.unwrap();
    assert_eq!(outdated.len(), 1);
    assert_eq!(outdated[0].current.as_deref(), Some("v1.1.0"));
    assert_eq!(outdated[0].wanted.as_deref(), Some("v1.1.0"));
    assert_eq!(outdated[0].latest.as_deref(), Some("v2.0.0"));

    let report = service.upgrade_packages(&["ai/style".into()]).await.unwrap();
    assert_eq!(report.succeeded, vec!["ai/style"]);
    assert_eq!(
        service.manifest().get_dependency("ai", "style").unwrap().version(),
        "^2.0.0"
    );
    let lock_file = service.lockfile().get_lock_file().unwrap();
    assert_eq!(lock_file.dependencies.len(), 1);
    assert!(lock_file.dependencies.contains_key("ai/style@v2.0.0"));
    assert!(service.list_outdated().await.unwrap().is_empty());

    let report = service.uninstall_all().await.unwrap();
    assert_eq!(report.succeeded, vec!["ai/style"]);
    assert!(!p.exists(CURSOR_NAMING));
    assert!(!p.exists(".cursor/rules/arm"));
    assert!(!p.exists(".github/instructions/arm-index.json"));
    assert!(service.manifest().get_dependencies().unwrap().is_empty());
    assert!(service.lockfile().get_lock_file().unwrap().dependencies.is_empty());
}

#[tokio::test]
async fn test_older_version_has_fewer_rules() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();

    p.service
        .install_ruleset("ai", "style", ruleset("1.0.0"))
        .await
        .unwrap();
    assert!(p.exists(CURSOR_NAMING));
    assert!(!p.exists(CURSOR_ERRORS));

    // Moving to 1.1.0 adds the rule; going back removes it again.
    p.service
        .install_ruleset("ai", "style", ruleset("1.1.0"))
        .await
        .unwrap();
    assert!(p.exists(CURSOR_ERRORS));
    p.service
        .install_ruleset("ai", "style", ruleset("1.0.0"))
        .await
        .unwrap();
    assert!(!p.exists(CURSOR_ERRORS));

    let lock_file = p.service.lockfile().get_lock_file().unwrap();
    let keys: Vec<&String> = lock_file.dependencies.keys().collect();
    assert_eq!(keys, vec!["ai/style@v1.0.0"]);
}

#[tokio::test]
async fn test_integrity_mismatch_blocks_install() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();
    p.service
        .lockfile()
        .upsert_dependency_lock(
            "ai",
            "style",
            "v1.1.0",
            DependencyLock {
                integrity: "sha256-tampered".into(),
            },
        )
        .unwrap();

    let err = p
        .service
        .install_ruleset("ai", "style", ruleset("^1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ArmError>(),
        Some(ArmError::Integrity { .. })
    ));
    let message = err.to_string();
    assert!(message.contains("ai/style@v1.1.0"));
    assert!(message.contains("sha256-tampered"));

    assert!(!p.exists(".cursor/rules/arm"));
    assert!(p.service.manifest().get_dependencies().unwrap().is_empty());
}

#[tokio::test]
async fn test_install_all_restores_sinks_from_manifest() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();
    p.service
        .manifest()
        .upsert_dependency("ai", "style", DependencyConfig::Ruleset(ruleset("^1.0.0")))
        .unwrap();
    p.service
        .manifest()
        .upsert_dependency(
            "ai",
            "review",
            DependencyConfig::Promptset(PromptsetDependency {
                version: "latest".into(),
                sinks: vec!["cursor".into()],
                include: vec!["prompts/**".into()],
                exclude: vec![],
            }),
        )
        .unwrap();

    let report = p.service.install_all().await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());
    assert!(p.exists(CURSOR_NAMING));
    assert!(p.exists(".cursor/rules/arm/ai/review/review_summary.md"));

    std::fs::remove_dir_all(p.work().join(".cursor/rules/arm")).unwrap();
    let report = p.service.install_all().await.unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(p.exists(CURSOR_NAMING));
}

#[tokio::test]
async fn test_branch_dependency_follows_new_commits() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();

    let first = p
        .service
        .install_ruleset("ai", "style", ruleset("main"))
        .await
        .unwrap();
    assert_eq!(first.metadata.version.raw(), "main");
    let lock = p.service.lockfile().find_dependency_lock("ai", "style").unwrap().unwrap();
    assert_eq!(lock.version, "main");

    p.repo.write("style.yml", STYLE_V1).commit("drop errors rule");
    p.service.lockfile().remove_dependency_lock("ai", "style").unwrap();
    let second = p
        .service
        .install_ruleset("ai", "style", ruleset("main"))
        .await
        .unwrap();

    assert_ne!(first.integrity, second.integrity);
    assert!(!p.exists(CURSOR_ERRORS));
}

#[tokio::test]
async fn test_rename_registry_moves_sink_output() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let p = project();
    p.service
        .install_ruleset("ai", "style", ruleset("^1.0.0"))
        .await
        .unwrap();

    p.service.rename_registry("ai", "rules").await.unwrap();
    assert!(!p.exists(CURSOR_NAMING));
    assert!(p.service.manifest().get_dependency("rules", "style").is_ok());
    assert!(p
        .service
        .lockfile()
        .find_dependency_lock("rules", "style")
        .unwrap()
        .is_some());

    p.service.install_all().await.unwrap();
    assert!(p.exists(".cursor/rules/arm/rules/style/style_naming.mdc"));
}
