//! Conditional Access impact matrix command

use crate::cmd::progress;
use crate::config::{ConfigManager, CredentialOverrides, Settings};
use crate::error::Result;
use crate::graph::auth::{GraphAuth, MICROSOFT_AUTHORITY};
use crate::graph::{GRAPH_API_BASE, GraphClient, conditional_access, directory};
use crate::matrix::selection::{self, SelectionOptions, UserType};
use crate::matrix::{self, MatrixOptions};
use crate::report::{self, OutputFormat};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PARALLEL: usize = 1;

#[derive(Args, Debug, Clone)]
pub struct MatrixArgs {
    /// Include policies in report-only mode
    #[arg(long, overrides_with = "no_include_report_only")]
    pub include_report_only: bool,

    /// Leave report-only policies out even when config.toml includes them
    #[arg(long, overrides_with = "include_report_only")]
    pub no_include_report_only: bool,

    /// Limit the number of users to process
    #[arg(short = 'n', long, value_name = "NUMBER", value_parser = clap::value_parser!(u64).range(1..))]
    pub number: Option<u64>,

    /// Filter users by group names or object IDs
    #[arg(short = 'g', long, value_name = "GROUPS", num_args = 1..)]
    pub groups: Vec<String>,

    /// Filter by user type
    #[arg(short = 't', long = "type", value_enum)]
    pub user_type: Option<UserType>,

    /// Process a random sample of users (e.g., 0.1 for 10%)
    #[arg(short = 's', long, value_name = "SAMPLE", value_parser = selection::parse_fraction)]
    pub sample: Option<f64>,

    /// Seed for --sample, to reproduce a sample
    #[arg(long, requires = "sample")]
    pub seed: Option<u64>,

    /// Number of users to evaluate concurrently [default: 1]
    #[arg(short = 'p', long, value_name = "PARALLEL", value_parser = clap::value_parser!(u16).range(1..))]
    pub parallel: Option<u16>,

    /// Timeout for requests to Microsoft Graph API, in seconds [default: 10]
    #[arg(long, value_name = "TIMEOUT", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Do not pause at the end
    #[arg(long)]
    pub no_pause: bool,

    /// Use transitive (nested) group membership
    #[arg(long)]
    pub transitive: bool,

    /// Directory for the report files [default: current directory]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Which report files to write
    #[arg(long, value_enum, default_value = "both")]
    pub format: OutputFormat,

    /// Tenant ID (Entra ID directory ID)
    #[arg(long, env = "TENANTID", hide_env_values = true)]
    pub tenant_id: Option<String>,

    /// Client ID of the app registration
    #[arg(long, env = "CLIENTID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// Client secret of the app registration
    #[arg(long, env = "CLIENTSECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Sign in interactively with a device code
    #[arg(long)]
    pub device_code: bool,

    /// Do not read or write the token cache
    #[arg(long)]
    pub no_cache: bool,
}

/// Where the command sends its HTTP traffic
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub graph_base: String,
    pub authority: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            graph_base: GRAPH_API_BASE.to_string(),
            authority: MICROSOFT_AUTHORITY.to_string(),
        }
    }
}

/// Options after merging flags with `config.toml`
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub include_report_only: bool,
    pub parallel: usize,
    pub timeout: Duration,
    pub output_dir: PathBuf,
}

impl MatrixArgs {
    pub fn resolve(&self, settings: &Settings, working_dir: &Path) -> Resolved {
        Resolved {
            include_report_only: match (self.include_report_only, self.no_include_report_only) {
                (true, _) => true,
                (_, true) => false,
                _ => settings.include_report_only.unwrap_or(false),
            },
            parallel: self
                .parallel
                .map(usize::from)
                .or(settings.parallel)
                .unwrap_or(DEFAULT_PARALLEL)
                .max(1),
            timeout: Duration::from_secs(
                self.timeout
                    .or(settings.timeout)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS)
                    .max(1),
            ),
            output_dir: self
                .output_dir
                .clone()
                .or_else(|| settings.output_dir.clone())
                .unwrap_or_else(|| working_dir.to_path_buf()),
        }
    }

    fn credential_overrides(&self) -> CredentialOverrides {
        CredentialOverrides {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }

    fn selection(&self) -> SelectionOptions {
        SelectionOptions {
            groups: self.groups.clone(),
            user_type: self.user_type,
            sample: self.sample,
            number: self.number.map(|n| n as usize),
            seed: self.seed,
        }
    }
}

/// Authenticate, build the matrix and write the reports; returns the files written
pub async fn generate(
    args: &MatrixArgs,
    config: &ConfigManager,
    endpoints: &Endpoints,
    working_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let settings = config.load_settings()?;
    let resolved = args.resolve(&settings, working_dir);
    tracing::debug!("Resolved options: {:?}", resolved);

    let credentials = config.resolve_credentials(args.credential_overrides(), working_dir)?;

    let auth = GraphAuth::new(config.clone())
        .with_authority(endpoints.authority.clone())
        .with_cache(!args.no_cache);
    let token = auth.get_access_token(&credentials, args.device_code).await?;

    println!(
        "{} Connected to tenant '{}'",
        "✓".green(),
        credentials.tenant_id.bold()
    );

    let graph = GraphClient::new(token, resolved.timeout)?.with_base_url(endpoints.graph_base.clone());

    let spinner = progress::create_spinner("Fetching Conditional Access policies...");
    let policies = match conditional_access::list_policies(&graph, resolved.include_report_only).await {
        Ok(policies) => {
            progress::finish_spinner_success(
                &spinner,
                &format!("{} Conditional Access policies found", policies.len()),
            );
            policies
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Failed to fetch policies");
            return Err(e);
        }
    };

    for policy in &policies {
        tracing::debug!("  {} [{}] {}", policy.display_name, policy.state.label(), policy.id);
    }

    let spinner = progress::create_spinner("Fetching users...");
    let users = match directory::list_users(&graph).await {
        Ok(users) => {
            progress::finish_spinner_success(&spinner, &format!("{} users found", users.len()));
            users
        }
        Err(e) => {
            progress::finish_spinner_error(&spinner, "Failed to fetch users");
            return Err(e);
        }
    };

    let users = selection::select_users(&graph, users, &args.selection()).await?;
    println!("{} {} users after filtering", "→".cyan(), users.len());

    let bar = progress::create_progress_bar(users.len() as u64, "Evaluating");
    let matrix = matrix::build_matrix(
        &graph,
        &policies,
        &users,
        MatrixOptions {
            parallel: resolved.parallel,
            transitive: args.transitive,
        },
        &bar,
    )
    .await;
    bar.finish_and_clear();
    let matrix = matrix?;

    println!("{} Matrix generation complete.", "✓".green());
    report::print_summary(&matrix);

    let stem = report::file_stem(&chrono::Local::now());
    let written = report::export(&matrix, &resolved.output_dir, &stem, args.format)?;

    println!();
    for path in &written {
        println!("{} Saved {}", "✓".green(), path.display());
    }

    Ok(written)
}

/// Entry point used by the binary
pub async fn run(args: MatrixArgs) -> Result<()> {
    let config = ConfigManager::new()?;
    let working_dir = std::env::current_dir()?;

    generate(&args, &config, &Endpoints::default(), &working_dir).await?;

    println!("\nExecuted in: {}", working_dir.display());

    if !args.no_pause {
        pause()?;
    }

    Ok(())
}

fn pause() -> Result<()> {
    use std::io::{self, Write};

    print!("Press Enter to exit...");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: MatrixArgs,
    }

    fn parse(argv: &[&str]) -> std::result::Result<MatrixArgs, clap::Error> {
        let mut full = vec!["camatrix"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).map(|c| c.args)
    }

    #[test]
    fn test_parse_readme_flags() {
        let args = parse(&[
            "--include-report-only",
            "-n",
            "50",
            "-g",
            "Finance",
            "3c54f805-db0a-4f83-be24-6744ab9fd758",
            "-t",
            "guest",
            "-s",
            "0.25",
            "-p",
            "4",
            "--timeout",
            "30",
            "--no-pause",
        ])
        .unwrap();

        assert!(args.include_report_only);
        assert_eq!(args.number, Some(50));
        assert_eq!(args.groups.len(), 2);
        assert_eq!(args.user_type, Some(UserType::Guest));
        assert_eq!(args.sample, Some(0.25));
        assert_eq!(args.parallel, Some(4));
        assert_eq!(args.timeout, Some(30));
        assert!(args.no_pause);
        assert_eq!(args.format, OutputFormat::Both);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["-t", "admin"]).is_err());
        assert!(parse(&["-s", "2"]).is_err());
        assert!(parse(&["-p", "0"]).is_err());
        assert!(parse(&["--timeout", "0"]).is_err());
        assert!(parse(&["--seed", "1"]).is_err());
        assert!(parse(&["-n", "0"]).is_err());
    }

    #[test]
    fn test_resolve_prefers_flags_over_settings() {
        let settings = Settings {
            timeout: Some(20),
            parallel: Some(6),
            output_dir: Some(PathBuf::from("/reports")),
            include_report_only: Some(true),
            log_level: None,
        };

        let defaults = parse(&[]).unwrap().resolve(&settings, Path::new("/work"));
        assert_eq!(defaults.timeout, Duration::from_secs(20));
        assert_eq!(defaults.parallel, 6);
        assert_eq!(defaults.output_dir, PathBuf::from("/reports"));
        assert!(defaults.include_report_only);

        let flagged = parse(&["-p", "2", "--timeout", "5", "-o", "out"])
            .unwrap()
            .resolve(&settings, Path::new("/work"));
        assert_eq!(flagged.parallel, 2);
        assert_eq!(flagged.timeout, Duration::from_secs(5));
        assert_eq!(flagged.output_dir, PathBuf::from("out"));

        let bare = parse(&[]).unwrap().resolve(&Settings::default(), Path::new("/work"));
        assert_eq!(bare.parallel, 1);
        assert_eq!(bare.timeout, Duration::from_secs(10));
        assert_eq!(bare.output_dir, PathBuf::from("/work"));
        assert!(!bare.include_report_only);
    }

    #[test]
    fn test_report_only_can_be_switched_off() {
        let settings = Settings {
            include_report_only: Some(true),
            ..Default::default()
        };
        let work = Path::new("/work");

        let off = parse(&["--no-include-report-only"]).unwrap();
        assert!(!off.resolve(&settings, work).include_report_only);

        let last_wins = parse(&["--no-include-report-only", "--include-report-only"]).unwrap();
        assert!(last_wins.resolve(&settings, work).include_report_only);

        let on = parse(&["--include-report-only"]).unwrap();
        assert!(on.resolve(&Settings::default(), work).include_report_only);
    }
}
