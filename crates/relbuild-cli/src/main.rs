//! relbuild - single-target release build CLI
//!
//! ## Commands
//!
//! - `build`: provision, compile, strip and publish one release binary
//! - `name`: print the canonical artifact name for an app and target
//! - `targets`: list the operating systems and architectures relbuild knows

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relbuild_core::{
    Architecture, ConfigError, ConfigFile, ConfigOverrides, PackageManager, PipelineConfig,
    TargetDescriptor, TargetOs, EXIT_CONFIG,
};
use relbuild_pipeline::ReleasePipeline;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "relbuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, strip and publish a release binary for one target", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ./relbuild.toml if present)
    #[arg(short, long, global = true, env = "RELBUILD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the release pipeline and print the published artifact path
    Build(BuildArgs),

    /// Print the canonical artifact name
    Name {
        /// Application name
        app_name: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// List supported operating systems and architectures
    Targets,
}

#[derive(clap::Args, Debug, Default)]
struct TargetArgs {
    /// Full target triple (e.g. x86_64-unknown-linux-gnu)
    #[arg(long, env = "RELBUILD_TARGET", conflicts_with_all = ["os", "arch"])]
    target: Option<String>,

    /// Target operating system (linux, macos, windows, freebsd)
    #[arg(long, env = "RELBUILD_OS", requires = "arch")]
    os: Option<String>,

    /// Target architecture (x86_64, aarch64, i686, armv7, riscv64)
    #[arg(long, env = "RELBUILD_ARCH", requires = "os")]
    arch: Option<String>,
}

#[derive(clap::Args, Debug, Default)]
struct BuildArgs {
    /// Application name used in the published file name
    #[arg(long, env = "RELBUILD_APP_NAME")]
    app_name: Option<String>,

    /// Directory containing Cargo.toml (default: .)
    #[arg(long, env = "RELBUILD_SOURCE_ROOT")]
    source_root: Option<PathBuf>,

    /// Existing directory the artifact is published into
    #[arg(short, long, env = "RELBUILD_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    /// Binary to build (default: the manifest's package name)
    #[arg(long, env = "RELBUILD_BINARY_NAME")]
    binary_name: Option<String>,

    /// Native package to install before building (repeatable)
    #[arg(short = 'd', long = "dep", value_name = "PACKAGE")]
    dependencies: Vec<String>,

    /// Host package manager (apt, dnf, pacman, zypper, brew)
    #[arg(long, env = "RELBUILD_PACKAGE_MANAGER")]
    package_manager: Option<PackageManager>,

    /// Run package manager commands through `sudo -n`
    #[arg(long, env = "RELBUILD_USE_SUDO", overrides_with = "no_sudo")]
    sudo: bool,

    /// Do not use sudo, even if the config file asks for it
    #[arg(long, overrides_with = "sudo")]
    no_sudo: bool,

    /// Assume the host already has every dependency
    #[arg(long, env = "RELBUILD_SKIP_PROVISION", overrides_with = "no_skip_provision")]
    skip_provision: bool,

    /// Provision dependencies, even if the config file skips it
    #[arg(long, overrides_with = "skip_provision")]
    no_skip_provision: bool,

    /// Publish the binary without stripping symbols
    #[arg(long, env = "RELBUILD_SKIP_STRIP", overrides_with = "no_skip_strip")]
    skip_strip: bool,

    /// Strip the binary, even if the config file skips it
    #[arg(long, overrides_with = "skip_strip")]
    no_skip_strip: bool,

    /// Extra flag passed through to the compiler (repeatable)
    #[arg(long = "extra-flag", value_name = "FLAG", allow_hyphen_values = true)]
    extra_flags: Vec<String>,

    /// cargo executable
    #[arg(long, env = "RELBUILD_CARGO")]
    cargo_program: Option<String>,

    /// strip executable
    #[arg(long, env = "RELBUILD_STRIP")]
    strip_program: Option<String>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, env = "RELBUILD_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl BuildArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            app_name: self.app_name.clone(),
            source_root: self.source_root.clone(),
            output_dir: self.output_dir.clone(),
            target: self.target.target.clone(),
            os: self.target.os.clone(),
            arch: self.target.arch.clone(),
            binary_name: self.binary_name.clone(),
            dependencies: self.dependencies.clone(),
            package_manager: self.package_manager,
            use_sudo: switch(self.sudo, self.no_sudo),
            skip_provision: switch(self.skip_provision, self.no_skip_provision),
            skip_strip: switch(self.skip_strip, self.no_skip_strip),
            cargo_program: self.cargo_program.clone(),
            strip_program: self.strip_program.clone(),
            extra_flags: self.extra_flags.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// A `--flag` / `--no-flag` pair: `None` when neither was given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

impl TargetArgs {
    fn descriptor(&self) -> Result<TargetDescriptor, ConfigError> {
        match (&self.target, &self.os, &self.arch) {
            (Some(triple), None, None) => Ok(TargetDescriptor::from_triple(triple)?),
            (None, Some(os), Some(arch)) => Ok(TargetDescriptor::from_parts(
                os.parse::<TargetOs>()?,
                arch.parse::<Architecture>()?,
            )),
            (None, None, None) => Ok(TargetDescriptor::host()?),
            _ => Err(ConfigError::ConflictingTarget(
                "use either --target or --os with --arch".to_string(),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    relbuild_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Build(args) => cmd_build(cli.config.as_deref(), &args).await,
        Commands::Name { app_name, target } => cmd_name(&app_name, &target),
        Commands::Targets => cmd_targets(cli.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(error_exit_code(&e))
        }
    }
}

/// Configuration problems exit with [`EXIT_CONFIG`], anything else with 1.
fn error_exit_code(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_CONFIG as u8
    } else {
        1
    }
}

fn load_config_file(explicit: Option<&Path>) -> Result<Option<ConfigFile>> {
    match explicit {
        Some(path) => Ok(Some(ConfigFile::load(path)?)),
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            Ok(ConfigFile::discover(&cwd)?)
        }
    }
}

fn resolve_config(file: Option<ConfigFile>, args: &BuildArgs) -> Result<PipelineConfig> {
    Ok(PipelineConfig::resolve(file, args.overrides())?)
}

/// Returns the process exit status: 0, or the failing stage's code.
async fn cmd_build(config_path: Option<&Path>, args: &BuildArgs) -> Result<u8> {
    let file = load_config_file(config_path)?;
    let config = resolve_config(file, args)?;
    debug!(?config, "Resolved configuration");
    info!(
        app = %config.app_name,
        target = %config.target,
        output = %config.published_path().display(),
        "Building release"
    );

    let run = ReleasePipeline::from_config(config).run().await;

    match &run.outcome {
        Ok(published) => println!("{}", published.path.display()),
        Err(e) => {
            eprintln!("relbuild: {} stage failed ({})", e.stage(), stage_kind(e));
            eprintln!("{}", e.diagnostic());
        }
    }

    // The stage outcome decides the exit status; a lost report does not.
    if let Some(report) = &args.report {
        match run.write_report(report) {
            Ok(()) => info!(path = %report.display(), "Run report written"),
            Err(e) => error!(path = %report.display(), error = %e, "Failed to write run report"),
        }
    }

    Ok(run.exit_code() as u8)
}

fn stage_kind(err: &relbuild_core::PipelineError) -> String {
    use relbuild_core::PipelineError;
    match err {
        PipelineError::Provision(e) => match &e.offending_package {
            Some(package) => format!("{} for {}", e.kind, package),
            None => e.kind.to_string(),
        },
        PipelineError::Compile(e) => e.kind.to_string(),
        PipelineError::Strip(e) => e.kind.to_string(),
        PipelineError::Publish(e) => e.kind.to_string(),
    }
}

fn cmd_name(app_name: &str, target: &TargetArgs) -> Result<u8> {
    let target = target.descriptor()?;
    println!("{}", relbuild_pipeline::canonical_name(app_name, &target));
    Ok(0)
}

fn cmd_targets(json: bool) -> Result<u8> {
    let os: Vec<&str> = TargetOs::ALL.iter().map(|o| o.as_str()).collect();
    let arch: Vec<&str> = Architecture::ALL.iter().map(|a| a.as_str()).collect();

    if json {
        let value = serde_json::json!({ "os": os, "arch": arch });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Operating systems: {}", os.join(", "));
        println!("Architectures:     {}", arch.join(", "));
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "relbuild",
            "--verbose",
            "build",
            "--app-name",
            "PandoraLauncher",
            "--output-dir",
            "dest",
            "--os",
            "linux",
            "--arch",
            "x86_64",
            "--dep",
            "libssl-dev",
            "-d",
            "pkg-config",
            "--extra-flag",
            "--locked",
            "--package-manager",
            "dnf",
            "--skip-strip",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Build(args) = cli.command else {
            panic!("expected build command");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.app_name.as_deref(), Some("PandoraLauncher"));
        assert_eq!(overrides.output_dir, Some(PathBuf::from("dest")));
        assert_eq!(overrides.dependencies, vec!["libssl-dev", "pkg-config"]);
        assert_eq!(overrides.extra_flags, vec!["--locked"]);
        assert_eq!(overrides.package_manager, Some(PackageManager::Dnf));
        assert_eq!(overrides.skip_strip, Some(true));
        assert_eq!(overrides.skip_provision, None);
        assert_eq!(overrides.use_sudo, None);
    }

    #[test]
    fn test_target_and_os_conflict() {
        let result = Cli::try_parse_from([
            "relbuild",
            "name",
            "app",
            "--target",
            "x86_64-unknown-linux-gnu",
            "--os",
            "linux",
            "--arch",
            "x86_64",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_os_requires_arch() {
        let result = Cli::try_parse_from(["relbuild", "name", "app", "--os", "linux"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_target_args_descriptor() {
        let args = TargetArgs {
            target: None,
            os: Some("windows".to_string()),
            arch: Some("amd64".to_string()),
        };
        let target = args.descriptor().unwrap();
        assert_eq!(target.artifact_name("app"), "app-windows-x86_64");

        let args = TargetArgs {
            target: Some("aarch64-apple-darwin".to_string()),
            ..Default::default()
        };
        assert_eq!(args.descriptor().unwrap().artifact_name("app"), "app-macos-aarch64");
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relbuild.toml");
        std::fs::write(
            &path,
            r#"
app_name = "FromFile"
output_dir = "dist"
target = "x86_64-unknown-linux-gnu"
dependencies = ["pkg-config"]
"#,
        )
        .unwrap();

        let args = BuildArgs {
            app_name: Some("FromCli".to_string()),
            dependencies: vec!["libssl-dev".to_string()],
            ..Default::default()
        };
        let file = load_config_file(Some(&path)).unwrap();
        let config = resolve_config(file, &args).unwrap();

        assert_eq!(config.app_name, "FromCli");
        assert_eq!(config.output_dir, PathBuf::from("dist"));
        assert!(config.dependencies.contains("pkg-config"));
        assert!(config.dependencies.contains("libssl-dev"));
    }

    #[test]
    fn test_config_errors_exit_with_config_code() {
        let args = BuildArgs {
            output_dir: Some(PathBuf::from("dist")),
            ..Default::default()
        };
        let err = resolve_config(None, &args).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG as u8);

        let other = anyhow::anyhow!("report write failed");
        assert_eq!(error_exit_code(&other), 1);
    }

    #[test]
    fn test_missing_explicit_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(error_exit_code(&err), EXIT_CONFIG as u8);
    }

    #[tokio::test]
    async fn test_build_failure_returns_stage_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();
        let config_path = dir.path().join("relbuild.toml");
        std::fs::write(&config_path, "").unwrap();

        // Source root has no Cargo.toml, so compile fails before invoking cargo.
        let args = BuildArgs {
            app_name: Some("app".to_string()),
            source_root: Some(dir.path().to_path_buf()),
            output_dir: Some(dest.clone()),
            target: TargetArgs {
                target: Some("x86_64-unknown-linux-gnu".to_string()),
                ..Default::default()
            },
            skip_provision: true,
            report: Some(dir.path().join("report.json")),
            ..Default::default()
        };

        let code = cmd_build(Some(&config_path), &args).await.unwrap();
        assert_eq!(code, 11);

        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report["outcome"]["stage"], "compile");
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_report_keeps_stage_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();
        let config_path = dir.path().join("relbuild.toml");
        std::fs::write(&config_path, "").unwrap();

        let args = BuildArgs {
            app_name: Some("app".to_string()),
            source_root: Some(dir.path().to_path_buf()),
            output_dir: Some(dest),
            target: TargetArgs {
                target: Some("x86_64-unknown-linux-gnu".to_string()),
                ..Default::default()
            },
            skip_provision: true,
            report: Some(dir.path().join("no-such-dir").join("report.json")),
            ..Default::default()
        };

        let code = cmd_build(Some(&config_path), &args).await.unwrap();
        assert_eq!(code, 11);
        assert!(!dir.path().join("no-such-dir").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_report_does_not_fail_successful_build() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src-root");
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(
            src.join("Cargo.toml"),
            "[package]\nname = \"tool\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        let config_path = dir.path().join("relbuild.toml");
        std::fs::write(&config_path, "").unwrap();

        // args: build --target <triple> --release --bin <name>
        let cargo = dir.path().join("fake-cargo.sh");
        std::fs::write(
            &cargo,
            "#!/bin/sh\nout=\"${CARGO_TARGET_DIR:-target}/$3/release\"\nmkdir -p \"$out\"\nprintf '\\177ELFcode' > \"$out/$6\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&cargo, std::fs::Permissions::from_mode(0o755)).unwrap();

        let args = BuildArgs {
            app_name: Some("Tool".to_string()),
            source_root: Some(src),
            output_dir: Some(dest.clone()),
            target: TargetArgs {
                target: Some("x86_64-unknown-linux-gnu".to_string()),
                ..Default::default()
            },
            skip_provision: true,
            skip_strip: true,
            cargo_program: Some(cargo.to_string_lossy().to_string()),
            report: Some(dir.path().join("no-such-dir").join("report.json")),
            ..Default::default()
        };

        let code = cmd_build(Some(&config_path), &args).await.unwrap();
        assert_eq!(code, 0);
        assert!(dest.join("Tool-linux-x86_64").is_file());
    }

    #[test]
    fn test_negated_flags_override_config_file() {
        let cli = Cli::try_parse_from([
            "relbuild",
            "build",
            "--no-sudo",
            "--no-skip-strip",
            "--skip-provision",
        ])
        .unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build command");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.use_sudo, Some(false));
        assert_eq!(overrides.skip_strip, Some(false));
        assert_eq!(overrides.skip_provision, Some(true));

        let file = ConfigFile {
            app_name: Some("app".to_string()),
            output_dir: Some(PathBuf::from("out")),
            target: Some("x86_64-unknown-linux-gnu".to_string()),
            use_sudo: Some(true),
            skip_strip: Some(true),
            ..Default::default()
        };
        let config = resolve_config(Some(file), &args).unwrap();
        assert!(!config.use_sudo);
        assert!(!config.skip_strip);
        assert!(config.skip_provision);
    }

    #[test]
    fn test_last_of_flag_pair_wins() {
        let cli = Cli::try_parse_from(["relbuild", "build", "--skip-strip", "--no-skip-strip"])
            .unwrap();
        let Commands::Build(args) = cli.command else {
            panic!("expected build command");
        };
        assert_eq!(args.overrides().skip_strip, Some(false));
    }
}
