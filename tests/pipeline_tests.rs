// End-to-end install pipeline tests against temporary prefixes.
//
// The fake toolchain stands in for venv/pip, so these run without Python.


use keg::cellar::Keg;
use keg::formula::Formula;
use keg::install::Installer;
use keg::receipt::InstallReceipt;
use keg::{IntegrityError, KegError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;
use test_helpers::{FakeToolchain, TestEnvironment};

const SHA: &str = "0019dfc4b32d63c1392aa264aed2253c1e0c2fb09216f8e2cc269bbfb8bb49b5";

const TESTS: &str = r#"
[[release.test]]
command = "explain"
args = ["ModuleNotFoundError"]
env = { GEMINI_API_KEY = "" }
status = 1
contains = "error"
ignore_case = true

[[release.test]]
command = "termexplain"
args = ["--version"]
"#;

fn isolated_formula(env: &TestEnvironment, extra: &str) -> Formula {
    let (url, sha) = env.source_archive("1.0.1");
    let (click_url, click_sha) = env.archive(
        "click-8.1.7.tar.gz",
        "click-8.1.7",
        &[("setup.py", "# click\n")],
    );

    let doc = format!(
        r#"
name = "termexplain"
commands = ["termexplain", "explain"]

[[release]]
version = "1.0.1"
url = "{url}"
sha256 = "{sha}"
depends_on = "python@3.11"

[[release.resource]]
name = "click"
url = "{click_url}"
sha256 = "{click_sha}"
{extra}
"#
    );
    Formula::load(&env.write_formula(&doc)).unwrap()
}

fn toolchain() -> FakeToolchain {
    FakeToolchain::new(&["3.11"], &["termexplain", "explain"])
}

#[tokio::test]
async fn test_isolated_install_end_to_end() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, TESTS);
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let outcome = installer.install(&formula, release).await.unwrap();

    let keg = &outcome.keg;
    for command in ["explain", "termexplain"] {
        let wrapper = keg.bin().join(command);
        let mode = fs::metadata(&wrapper).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755, "{} is not executable", command);
        assert!(env.config.bin_dir().join(command).symlink_metadata().is_ok());
    }

    assert_eq!(outcome.linked.len(), 2);
    assert!(outcome.receipt.tested);
    assert!(outcome.receipt.healthy);
    assert_eq!(outcome.receipt.strategy, "isolated");

    let on_disk = InstallReceipt::read(&keg.path).unwrap();
    assert!(on_disk.healthy);
    assert_eq!(on_disk.resources.len(), 1);
    assert_eq!(
        on_disk.interpreter.map(|i| i.version),
        Some("3.11.0".to_string())
    );

    // Build directory is gone after install
    assert!(!env.config.build_dir().join("termexplain-1.0.1").exists());
}

#[tokio::test]
async fn test_resources_installed_before_package() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    installer.install(&formula, release).await.unwrap();

    let installed = installer.toolchain().installed.borrow();
    assert_eq!(installed.len(), 2);
    assert!(installed[0].is_file());
    assert!(installed[0].to_string_lossy().contains("click"));
    // The package itself is installed last, from the unpacked source tree
    assert!(
        installed[1]
            .to_string_lossy()
            .ends_with("termexplain-1.0.1/termExplain-1.0.1")
    );
}

#[tokio::test]
async fn test_installed_alias_behaviour() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    installer.install(&formula, release).await.unwrap();

    let alias = env.config.bin_dir().join("explain");
    let output = Command::new(&alias)
        .arg("ModuleNotFoundError")
        .env_remove("GEMINI_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.to_lowercase().contains("error"));

    let version = Command::new(&alias).arg("--version").output().unwrap();
    assert!(version.status.success());
}

#[tokio::test]
async fn test_wrapper_references_isolated_environment() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let outcome = installer.install(&formula, release).await.unwrap();

    let wrapper = fs::read_to_string(outcome.keg.bin().join("explain")).unwrap();
    let entry = outcome.keg.libexec().join("bin").join("explain");
    assert!(wrapper.contains(entry.to_str().unwrap()));
    assert!(!wrapper.contains(env.config.build_dir().to_str().unwrap()));
    assert!(!wrapper.contains("main.py"));
}

#[tokio::test]
async fn test_copied_wrapper_is_rewritten() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(
        &env,
        r#"
[release.install]
strategy = "isolated"
wrappers = [{ name = "explain", source = "explain.sh" }]
inreplace = [{ path = "bin/explain", from = "python3 main.py", to = "{libexec}/bin/termexplain" }]
"#,
    );
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let outcome = installer.install(&formula, release).await.unwrap();

    let wrapper = fs::read_to_string(outcome.keg.bin().join("explain")).unwrap();
    assert!(!wrapper.contains("python3 main.py"));
    assert!(wrapper.contains(&format!(
        "{}/bin/termexplain",
        outcome.keg.libexec().display()
    )));
    // Only the declared wrapper is exposed
    assert!(!outcome.keg.bin().join("termexplain").exists());
}

#[tokio::test]
async fn test_failed_inreplace_leaves_no_keg() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(
        &env,
        r#"
[release.install]
strategy = "isolated"
wrappers = [{ name = "explain", source = "explain.sh" }]
inreplace = [{ path = "bin/explain", from = "not in the script", to = "{libexec}" }]
"#,
    );
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, release).await.unwrap_err();

    assert!(matches!(err, KegError::Install(_)), "{err}");
    assert!(!Keg::new(&env.config, "termexplain", "1.0.1").exists());
}

#[tokio::test]
async fn test_failed_reinstall_keeps_previous_keg() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let first = installer.install(&formula, release).await.unwrap();
    let files = first.keg.files().unwrap();

    let broken = isolated_formula(
        &env,
        r#"
[release.install]
strategy = "isolated"
inreplace = [{ path = "bin/explain", from = "not in the wrapper", to = "{libexec}" }]
"#,
    );
    let err = installer
        .install(&broken, broken.release(None).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, KegError::Install(_)), "{err}");

    let keg = Keg::new(&env.config, "termexplain", "1.0.1");
    assert!(keg.exists());
    assert_eq!(keg.files().unwrap(), files);
    assert!(InstallReceipt::read(&keg.path).unwrap().healthy);

    let alias = env.config.bin_dir().join("explain");
    assert!(Command::new(&alias).arg("--version").status().unwrap().success());

    let leftovers: Vec<_> = fs::read_dir(env.config.cellar().join("termexplain"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(leftovers, vec!["1.0.1".to_string()]);
}

#[tokio::test]
async fn test_failed_receipt_write_leaves_no_links() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut toolchain = toolchain();
    toolchain.occupy_receipt = true;
    let mut installer = Installer::new(&env.config, toolchain).unwrap();
    installer.install(&formula, release).await.unwrap_err();

    assert!(!Keg::new(&env.config, "termexplain", "1.0.1").exists());
    let bin = env.config.bin_dir();
    assert!(!bin.exists() || fs::read_dir(&bin).unwrap().next().is_none());
}

#[tokio::test]
async fn test_unpatched_source_wrapper_is_rejected() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(
        &env,
        r#"
[release.install]
strategy = "isolated"
wrappers = [{ name = "explain", source = "explain.sh" }]
"#,
    );
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, release).await.unwrap_err();

    assert!(err.to_string().contains("isolated environment"), "{err}");
    assert!(!Keg::new(&env.config, "termexplain", "1.0.1").exists());
}

#[tokio::test]
async fn test_install_twice_is_idempotent() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, TESTS);
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let first = installer.install(&formula, release).await.unwrap();
    let first_files = first.keg.files().unwrap();

    let second = installer.install(&formula, release).await.unwrap();
    let second_files = second.keg.files().unwrap();

    assert_eq!(first_files, second_files);
    assert_eq!(first.receipt.files, second.receipt.files);
    assert_eq!(keg::cellar::list_installed(&env.config).unwrap().len(), 1);
}

#[tokio::test]
async fn test_tampered_archive_is_rejected() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let mut release = formula.release(None).unwrap().clone();
    release.sha256 = SHA.to_string();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, &release).await.unwrap_err();

    assert!(matches!(
        err,
        KegError::Integrity(IntegrityError::Mismatch { .. })
    ));
    assert!(!Keg::new(&env.config, "termexplain", "1.0.1").exists());
}

#[tokio::test]
async fn test_empty_hash_is_refused() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let mut release = formula.release(None).unwrap().clone();
    release.sha256 = String::new();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, &release).await.unwrap_err();

    assert!(matches!(
        err,
        KegError::Integrity(IntegrityError::MissingHash(_))
    ));
}

#[tokio::test]
async fn test_tampered_resource_is_rejected() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let mut release = formula.release(None).unwrap().clone();
    release.resources[0].sha256 = SHA.to_string();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, &release).await.unwrap_err();

    assert_eq!(err.stage(), "verify");
}

#[tokio::test]
async fn test_missing_interpreter_aborts_before_install() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let toolchain = FakeToolchain::new(&["3.8"], &["termexplain", "explain"]);
    let mut installer = Installer::new(&env.config, toolchain).unwrap();
    let err = installer.install(&formula, release).await.unwrap_err();

    assert!(matches!(err, KegError::Dependency(_)));
    assert!(!env.config.cellar().exists());
}

#[tokio::test]
async fn test_failing_test_marks_keg_unhealthy() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(
        &env,
        r#"
[[release.test]]
command = "explain"
args = ["ModuleNotFoundError"]
env = { GEMINI_API_KEY = "" }
status = 0
"#,
    );
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    let err = installer.install(&formula, release).await.unwrap_err();
    assert!(matches!(err, KegError::Verification(_)));

    let keg = Keg::new(&env.config, "termexplain", "1.0.1");
    assert!(keg.exists());
    let receipt = InstallReceipt::read(&keg.path).unwrap();
    assert!(receipt.tested);
    assert!(!receipt.healthy);
    assert!(
        receipt
            .verification_error
            .unwrap()
            .contains("exited with 1, expected 0")
    );
}

#[tokio::test]
async fn test_skip_tests_leaves_keg_untested() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, TESTS);
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain())
        .unwrap()
        .skip_tests(true);
    let outcome = installer.install(&formula, release).await.unwrap();
    assert!(!outcome.receipt.tested);
}

#[tokio::test]
async fn test_direct_install() {
    let env = TestEnvironment::new();
    let (url, sha) = env.source_archive("1.0.0");
    let doc = format!(
        r#"
name = "termexplain"
commands = ["termexplain", "explain"]

[[release]]
version = "1.0.0"
url = "{url}"
sha256 = "{sha}"

[release.install]
strategy = "direct"
files = [
    {{ from = "explain.sh", to = "explain" }},
    {{ from = "main.py", to = "termexplain" }},
]

[[release.test]]
command = "termexplain"
args = ["--version"]
"#
    );
    let formula = Formula::load(&env.write_formula(&doc)).unwrap();
    let release = formula.release(None).unwrap();

    // No interpreter declared, so nothing is resolved
    let mut installer = Installer::new(&env.config, FakeToolchain::new(&[], &[])).unwrap();
    let outcome = installer.install(&formula, release).await.unwrap();

    assert_eq!(outcome.receipt.strategy, "direct");
    assert!(outcome.receipt.healthy);
    assert!(!outcome.keg.libexec().exists());
    let paths: Vec<_> = outcome.receipt.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["bin/explain", "bin/termexplain"]);
    assert!(outcome.receipt.files.iter().all(|f| f.mode == 0o755));
}

#[tokio::test]
async fn test_uninstall_removes_keg_and_links() {
    let env = TestEnvironment::new();
    let formula = isolated_formula(&env, "");
    let release = formula.release(None).unwrap();

    let mut installer = Installer::new(&env.config, toolchain()).unwrap();
    installer.install(&formula, release).await.unwrap();

    keg::commands::uninstall(&env.config, "termexplain", None).unwrap();

    assert!(!Keg::new(&env.config, "termexplain", "1.0.1").exists());
    assert!(
        env.config
            .bin_dir()
            .join("explain")
            .symlink_metadata()
            .is_err()
    );
}
