//! End-to-end pipeline runs against fakes and scripted tools.

use relbuild_core::{
    Architecture, BuildProfile, CompileError, CompileErrorKind, PipelineConfig, PipelineError,
    ProvisionErrorKind, PublishErrorKind, Stage, StripErrorKind, TargetDescriptor, TargetOs,
};
use relbuild_pipeline::fakes::{
    FakeCompiler, FakePackageIndex, FakeProvisioner, FakeStages, FakeStripper,
};
use relbuild_pipeline::{ReleasePipeline, StageStatus};
use std::path::{Path, PathBuf};

fn linux_x86_64() -> TargetDescriptor {
    TargetDescriptor::from_parts(TargetOs::Linux, Architecture::X86_64)
}

/// Config rooted in `root`, with an existing `root/dest` output directory.
fn pipeline_config(root: &Path, app: &str) -> PipelineConfig {
    let dest = root.join("dest");
    std::fs::create_dir_all(&dest).unwrap();
    PipelineConfig::new(app, root, dest, linux_x86_64())
}

fn intermediate_path(fakes: &FakeStages) -> PathBuf {
    fakes
        .compiler
        .output_path(&linux_x86_64(), &BuildProfile::release())
}

/// Test: the published file lands under its canonical name and nowhere else
#[tokio::test]
async fn test_successful_release() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let mut config = pipeline_config(dir.path(), "PandoraLauncher");
    config.dependencies.insert("libssl-dev").unwrap();
    config.dependencies.insert("pkg-config").unwrap();

    let run = ReleasePipeline::new(config, fakes.stage_set()).run().await;

    assert!(run.success(), "pipeline should succeed: {:?}", run.outcome);
    assert_eq!(run.exit_code(), 0);
    assert_eq!(fakes.call_counts(), (1, 1, 1, 1));

    let published = run.into_result().unwrap();
    assert_eq!(
        published.path,
        dir.path().join("dest").join("PandoraLauncher-linux-x86_64")
    );
    assert!(published.path.is_file());
    assert!(published.stripped);
    assert!(
        !intermediate_path(&fakes).exists(),
        "intermediate artifact should have been moved"
    );

    let installed = fakes.provisioner.index().installed();
    assert_eq!(installed, vec!["libssl-dev", "pkg-config"]);
}

/// Test: a second run overwrites the artifact and leaves host state unchanged
#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let mut config = pipeline_config(dir.path(), "app");
    config.dependencies.insert("pkg-config").unwrap();
    let pipeline = ReleasePipeline::new(config, fakes.stage_set());

    let first = pipeline.run().await.into_result().unwrap();
    let first_content = std::fs::read(&first.path).unwrap();
    let second = pipeline.run().await.into_result().unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(std::fs::read(&second.path).unwrap(), first_content);
    assert_eq!(first.sha256, second.sha256);
    assert_eq!(std::fs::read_dir(dir.path().join("dest")).unwrap().count(), 1);
    assert_eq!(fakes.provisioner.index().installed(), vec!["pkg-config"]);
    assert_eq!(fakes.call_counts(), (2, 2, 2, 2));
}

/// Test: a compile failure stops the run before strip and publish
#[tokio::test]
async fn test_compile_failure_stops_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let raw = "error[E0425]: cannot find value `x` in this scope\n --> src/main.rs:2:5";
    let fakes = FakeStages::new(dir.path().join("target")).with_compiler(
        FakeCompiler::new(dir.path().join("target"))
            .failing(CompileError::new(CompileErrorKind::CompilationFailed, raw)),
    );

    let run = ReleasePipeline::new(pipeline_config(dir.path(), "app"), fakes.stage_set())
        .run()
        .await;

    assert!(!run.success());
    assert_eq!(run.exit_code(), Stage::Compile.exit_code());
    assert_eq!(fakes.call_counts(), (1, 1, 0, 0));
    assert!(run.record(Stage::Strip).is_none());
    assert!(run.record(Stage::Publish).is_none());
    assert!(!dir.path().join("dest/app-linux-x86_64").exists());

    match run.into_result() {
        Err(PipelineError::Compile(e)) => {
            assert_eq!(e.kind, CompileErrorKind::CompilationFailed);
            assert_eq!(e.diagnostic_output, raw);
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

/// Test: an uninstallable package is reported by name and nothing else runs
#[tokio::test]
async fn test_missing_package_aborts_in_provision() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target")).with_provisioner(
        FakeProvisioner::new(FakePackageIndex::new().failing_install("libfoo-nonexistent")),
    );
    let mut config = pipeline_config(dir.path(), "app");
    config.dependencies.insert("libfoo-nonexistent").unwrap();

    let run = ReleasePipeline::new(config, fakes.stage_set()).run().await;

    assert_ne!(run.exit_code(), 0);
    assert_eq!(run.exit_code(), Stage::Provision.exit_code());
    assert_eq!(fakes.call_counts(), (1, 0, 0, 0));
    assert_eq!(
        run.record(Stage::Provision).map(|r| r.status),
        Some(StageStatus::Failed)
    );

    match run.into_result() {
        Err(PipelineError::Provision(e)) => {
            assert_eq!(e.kind, ProvisionErrorKind::PackageInstallFailed);
            assert_eq!(e.offending_package.as_deref(), Some("libfoo-nonexistent"));
        }
        other => panic!("expected provision error, got {other:?}"),
    }
}

/// Test: an index refresh failure installs nothing
#[tokio::test]
async fn test_refresh_failure_installs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target")).with_provisioner(
        FakeProvisioner::new(FakePackageIndex::new().failing_refresh()),
    );
    let mut config = pipeline_config(dir.path(), "app");
    config.dependencies.insert("pkg-config").unwrap();

    let run = ReleasePipeline::new(config, fakes.stage_set()).run().await;

    assert_eq!(run.exit_code(), Stage::Provision.exit_code());
    assert_eq!(fakes.provisioner.index().install_calls(), 0);
    assert_eq!(fakes.call_counts(), (1, 0, 0, 0));
}

/// Test: empty dependency set provisions without touching the index
#[tokio::test]
async fn test_empty_dependencies_skip_index() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));

    let run = ReleasePipeline::new(pipeline_config(dir.path(), "app"), fakes.stage_set())
        .run()
        .await;

    assert!(run.success());
    assert_eq!(fakes.provisioner.calls(), 1);
    assert_eq!(fakes.provisioner.index().refresh_count(), 0);
}

/// Test: missing output directory fails publish and keeps the stripped binary
#[tokio::test]
async fn test_missing_output_dir_keeps_intermediate() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let mut config = pipeline_config(dir.path(), "app");
    config.output_dir = dir.path().join("no-such-dir");

    let run = ReleasePipeline::new(config, fakes.stage_set()).run().await;

    assert_eq!(run.exit_code(), Stage::Publish.exit_code());
    assert!(!dir.path().join("no-such-dir").exists());
    assert!(intermediate_path(&fakes).exists());

    match run.into_result() {
        Err(PipelineError::Publish(e)) => assert_eq!(e.kind, PublishErrorKind::OutputDirMissing),
        other => panic!("expected publish error, got {other:?}"),
    }
}

/// Test: strip never grows the binary
#[tokio::test]
async fn test_stripped_size_not_larger() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let unstripped_len = {
        let probe_dir = tempfile::tempdir().unwrap();
        let probe = FakeStages::new(probe_dir.path().join("target"));
        let mut config = pipeline_config(probe_dir.path(), "app");
        config.skip_strip = true;
        let published = ReleasePipeline::new(config, probe.stage_set())
            .run()
            .await
            .into_result()
            .unwrap();
        std::fs::metadata(&published.path).unwrap().len()
    };

    let published = ReleasePipeline::new(pipeline_config(dir.path(), "app"), fakes.stage_set())
        .run()
        .await
        .into_result()
        .unwrap();

    let stripped_len = std::fs::metadata(&published.path).unwrap().len();
    assert!(stripped_len <= unstripped_len);
    assert!(stripped_len < unstripped_len, "fake symbols should be dropped");
    assert_eq!(published.source.size_bytes, stripped_len);
}

/// Test: strip failure leaves nothing published
#[tokio::test]
async fn test_strip_failure_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"))
        .with_stripper(FakeStripper::new().failing(StripErrorKind::UnsupportedBinaryFormat));

    let run = ReleasePipeline::new(pipeline_config(dir.path(), "app"), fakes.stage_set())
        .run()
        .await;

    assert_eq!(run.exit_code(), Stage::Strip.exit_code());
    assert_eq!(fakes.call_counts(), (1, 1, 1, 0));
    assert_eq!(std::fs::read_dir(dir.path().join("dest")).unwrap().count(), 0);
}

/// Test: pre-provisioned host and skipped strip
#[tokio::test]
async fn test_skip_provision_and_strip() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let mut config = pipeline_config(dir.path(), "app");
    config.dependencies.insert("pkg-config").unwrap();
    config.skip_provision = true;
    config.skip_strip = true;

    let run = ReleasePipeline::new(config, fakes.stage_set()).run().await;

    assert!(run.success());
    assert_eq!(fakes.call_counts(), (0, 1, 0, 1));
    assert_eq!(run.passed_count(), 2);
    assert!(fakes.provisioner.index().installed().is_empty());
    assert!(!run.into_result().unwrap().stripped);
}

/// Test: Windows artifacts keep the canonical name without an extension
#[tokio::test]
async fn test_windows_target_canonical_name() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));
    let mut config = pipeline_config(dir.path(), "PandoraLauncher");
    config.target = TargetDescriptor::from_parts(TargetOs::Windows, Architecture::X86_64);

    let published = ReleasePipeline::new(config, fakes.stage_set())
        .run()
        .await
        .into_result()
        .unwrap();

    assert_eq!(
        published.path.file_name().unwrap(),
        "PandoraLauncher-windows-x86_64"
    );
    assert_eq!(
        published.source.path.file_name().unwrap(),
        "app.exe",
        "toolchain output keeps the platform suffix"
    );
}

/// Test: the JSON report mirrors the run
#[tokio::test]
async fn test_report_written() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = FakeStages::new(dir.path().join("target"));

    let run = ReleasePipeline::new(pipeline_config(dir.path(), "app"), fakes.stage_set())
        .run()
        .await;
    let report_path = dir.path().join("run.json");
    run.write_report(&report_path).unwrap();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["run_id"], run.run_id.to_string());
    assert_eq!(report["app_name"], "app");
    assert_eq!(report["stages"].as_array().unwrap().len(), 4);
    assert_eq!(report["stages"][0]["stage"], "provision");
    assert_eq!(report["outcome"]["status"], "succeeded");
    assert_eq!(
        report["outcome"]["artifact"]["sha256"],
        run.into_result().unwrap().sha256
    );
}

/// Test: production stages driven by scripted cargo and strip stand-ins
#[cfg(unix)]
#[tokio::test]
async fn test_production_stages_with_scripted_tools() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src-root");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(
        src.join("Cargo.toml"),
        "[package]\nname = \"pandora\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();

    // args: build --target <triple> --release --bin <name>
    let cargo = dir.path().join("fake-cargo.sh");
    std::fs::write(
        &cargo,
        "#!/bin/sh\nout=\"${CARGO_TARGET_DIR:-target}/$3/release\"\nmkdir -p \"$out\"\nprintf '\\177ELFcode-and-a-long-symbol-table' > \"$out/$6\"\n",
    )
    .unwrap();
    // args: --strip-all <path>
    let strip = dir.path().join("fake-strip.sh");
    std::fs::write(
        &strip,
        "#!/bin/sh\nhead -c 8 \"$2\" > \"$2.tmp\" && mv \"$2.tmp\" \"$2\"\n",
    )
    .unwrap();
    for tool in [&cargo, &strip] {
        std::fs::set_permissions(tool, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut config = pipeline_config(dir.path(), "PandoraLauncher");
    config.source_root = src;
    config.skip_provision = true;
    config.tools.cargo_program = cargo.to_string_lossy().to_string();
    config.tools.strip_program = strip.to_string_lossy().to_string();

    let published = ReleasePipeline::from_config(config)
        .run()
        .await
        .into_result()
        .unwrap();

    assert!(published.path.ends_with("dest/PandoraLauncher-linux-x86_64"));
    assert_eq!(std::fs::read(&published.path).unwrap(), b"\x7fELFcode");
    assert!(published.stripped);
}
