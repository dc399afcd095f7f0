use anyhow::{bail, Context, Result};
use clap::parser::ValueSource;
use clap::{arg, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use keel_build::{render_dockerfile, BuildPlan, Executor, FinalImage};
use keel_config::{BuildParameters, ImagePolicy};
use keel_docker::{BuildContext, DockerBackend, DockerCli};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub fn cli() -> Command {
    Command::new("keel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keel builds a derived runtime image on top of a vendor base image. Every build follows the same validated plan: select the base, copy the dependency manifest and enabled sources, optionally install dependencies, and drop to the restricted user.")
        .arg(arg!(log_level: -l --loglevel <LOG_LEVEL> "Log level (trace, debug, info, warn, error)").default_value("info"))
        .arg(arg!(config: -c --config <CONFIG> "Image policy file, relative to the project directory").default_value(keel_core::constants::DEFAULT_CONFIG_FILE))
        .arg(arg!(project: -C --project <DIR> "Project directory holding the manifest and source trees").default_value("."))
        .arg(
            Arg::new("build_arg")
                .long("build-arg")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Build parameter (distribution-version, runtime-version, feature-extras, install-flag)"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("plan").about("Describes the build steps"))
        .subcommand(Command::new("render").about("Prints the generated Dockerfile"))
        .subcommand(
            Command::new("build")
                .about("Stages the build context and builds the image")
                .arg(arg!(tag: -t --tag <TAG> "Image tag (defaults to <image_name>:<distribution-version>)"))
                .arg(
                    Arg::new("skip_base_check")
                        .long("skip-base-check")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask the registry whether the base image exists"),
                )
                .arg(
                    Arg::new("keep_context")
                        .long("keep-context")
                        .value_name("DIR")
                        .help("Stage the build context into DIR and keep it"),
                )
                .arg(arg!(report: --report <PATH> "Write a JSON description of the built image")),
        )
}

pub fn init_logging(level: &str) {
    env_logger::Builder::new().parse_filters(level).init();
    info!("Log level set to: {}", level);
}

/// Everything resolved before the first build step runs.
#[derive(Debug)]
pub struct Invocation {
    pub project_dir: PathBuf,
    pub policy: ImagePolicy,
    pub params: BuildParameters,
    pub plan: BuildPlan,
}

impl Invocation {
    pub fn prepare(
        project_dir: &Path,
        config: &Path,
        config_required: bool,
        build_args: &[String],
    ) -> Result<Self> {
        let config = if config.is_absolute() {
            config.to_path_buf()
        } else {
            project_dir.join(config)
        };
        let policy = if config_required {
            ImagePolicy::load(&config)?
        } else {
            ImagePolicy::load_or_default(&config)?
        };

        let params = BuildParameters::from_pairs(build_args)
            .context("Failed to resolve build parameters")?;
        let plan = BuildPlan::compose(&params, &policy).context("Failed to compose build plan")?;
        debug!("Build plan:\n{}", plan.describe());

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            policy,
            params,
            plan,
        })
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let project_dir = matches
            .get_one::<String>("project")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(keel_core::constants::DEFAULT_CONFIG_FILE));
        let config_required = matches.value_source("config") != Some(ValueSource::DefaultValue);
        let build_args: Vec<String> = matches
            .get_many::<String>("build_arg")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Self::prepare(&project_dir, &config, config_required, &build_args)
    }

    pub fn default_tag(&self) -> String {
        self.policy.image_tag(&self.params)
    }
}

pub async fn run(matches: &ArgMatches) -> Result<()> {
    let invocation = Invocation::from_matches(matches)?;

    match matches.subcommand() {
        Some(("plan", _)) => {
            println!("{}", invocation.plan.describe());
        }
        Some(("render", _)) => {
            print!("{}", render_dockerfile(&invocation.plan)?);
        }
        Some(("build", sub)) => {
            let image = build(&invocation, sub).await?;
            println!(
                "{} {} (user {})",
                "Built".green().bold(),
                image.tag.white().bold(),
                image.user
            );
        }
        Some((other, _)) => bail!("Unknown subcommand `{}`", other),
        None => bail!("No subcommand given"),
    }
    Ok(())
}

async fn build(invocation: &Invocation, matches: &ArgMatches) -> Result<FinalImage> {
    let tag = matches
        .get_one::<String>("tag")
        .cloned()
        .unwrap_or_else(|| invocation.default_tag());

    let context = match matches.get_one::<String>("keep_context") {
        Some(dir) => BuildContext::at(Path::new(dir))?,
        None => BuildContext::temporary()?,
    };

    let mut backend = DockerBackend::new(DockerCli::new()?, &invocation.project_dir, context);
    if matches.get_flag("skip_base_check") {
        backend = backend.skip_base_check();
    }

    let image = Executor::new(backend)
        .run(&invocation.plan, &tag)
        .await
        .with_context(|| format!("Failed to build {}", tag))?;

    if let Some(report) = matches.get_one::<String>("report") {
        fs::write(report, image.to_json()?)
            .with_context(|| format!("Failed to write report to {}", report))?;
        info!("Wrote image report to {}", report);
    }
    Ok(image)
}
