use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use hmv_core::catalog::{
    AggregationMode, AggregationRequest, CatalogEngine, CatalogFilter, CatalogListing,
    CatalogOutcome,
};
use hmv_core::client::{HmvClient, HmvClientConfig};
use hmv_core::config::{HmvConfig, load_config};
use hmv_core::credentials::{load_credentials, save_credentials};
use hmv_core::download::{DownloadOutcome, download_vm};
use hmv_core::flag::{FlagVerdict, submit_flag};
use hmv_core::model::Record;
use hmv_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display, resolve_paths,
};
use hmv_core::writeups::{Writeup, WriteupsOutcome, fetch_writeups};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const NO_MATCHES_MESSAGE: &str = "No machines found matching your criteria.";

#[derive(Debug, Parser)]
#[command(name = "hmv", version, about = "HackMyVM command line client")]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "State directory (default ~/.hmv)")]
    home: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Log debug output to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    home: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            home: cli.home.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Store HackMyVM credentials")]
    Config,
    #[command(about = "List, search and interact with HackMyVM machines")]
    Machine(MachineArgs),
}

#[derive(Debug, Args)]
struct MachineArgs {
    #[arg(short = 'l', long = "list", help = "List one page of machines")]
    list: bool,
    #[arg(short = 'a', long = "all", help = "Fetch every page into one table")]
    all: bool,
    #[arg(
        short = 's',
        long = "sort",
        value_name = "CATEGORY",
        help = "beginner, intermediate, advanced, linux, windows, size, hacked or all"
    )]
    category: Option<String>,
    #[arg(short = 'n', long = "name", value_name = "TEXT", help = "Search machines by name")]
    search: Option<String>,
    #[arg(short = 'p', long, default_value_t = 1, value_name = "NUMBER")]
    page: u32,
    #[arg(short = 'd', long, value_name = "VM", help = "Download a machine archive")]
    download: Option<String>,
    #[arg(short = 'f', long, value_name = "FLAG", help = "Flag to submit (requires --vm)")]
    flag: Option<String>,
    #[arg(short = 'v', long, value_name = "VM", help = "Target machine for --flag and --writeups")]
    vm: Option<String>,
    #[arg(short = 'w', long, help = "List community writeups (requires --vm)")]
    writeups: bool,
    #[arg(long, help = "Print results as JSON")]
    json: bool,
    #[arg(long, help = "Skip the completion status re-fetch")]
    no_status_sync: bool,
}

impl MachineArgs {
    /// Blank `-s` and `-n` values count as absent.
    fn category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn search(&self) -> Option<&str> {
        self.search.as_deref().filter(|value| !value.is_empty())
    }

    fn wants_listing(&self) -> bool {
        self.list || self.all || self.category().is_some() || self.search().is_some()
    }

    fn aggregation_request(&self) -> AggregationRequest {
        AggregationRequest {
            filter: self.category().and_then(CatalogFilter::parse),
            search: self.search().map(ToString::to_string),
            page: self.page.max(1),
            fetch_all: self.all,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Config) => run_config(&runtime),
        Some(Commands::Machine(args)) => run_machine(&runtime, args).await,
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("HMV_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_config(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    println!("HackMyVM account configuration");
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let username = prompt(&mut input, "Username")?;
    let password = rpassword::prompt_password("Password: ")
        .context("failed to read password from the terminal")?;
    if username.is_empty() {
        bail!("username cannot be empty");
    }

    save_credentials(&paths, &username, &password)?;
    println!("Credentials saved");
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!(
        "credentials_path: {}",
        normalize_for_display(&paths.credentials_path)
    );
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn prompt(input: &mut impl BufRead, label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    input
        .read_line(&mut line)
        .with_context(|| format!("failed to read {label} from stdin"))?;
    Ok(line.trim_end_matches(['\r', '\n']).trim().to_string())
}

async fn run_machine(runtime: &RuntimeOptions, args: MachineArgs) -> Result<()> {
    if args.writeups && args.vm.is_none() {
        bail!("a target VM (-v/--vm) is required to fetch writeups");
    }
    if args.flag.is_some() && args.vm.is_none() {
        bail!("a target VM (-v/--vm) is required to submit a flag");
    }
    if let Some(vm) = &args.vm
        && args.flag.is_none()
        && !args.writeups
    {
        bail!(
            "target VM '{vm}' specified without an action; use -f <flag> to submit or -w to fetch writeups"
        );
    }
    if !args.writeups && args.flag.is_none() && args.download.is_none() && !args.wants_listing() {
        let mut command = Cli::command();
        if let Some(machine) = command.find_subcommand_mut("machine") {
            machine.print_help()?;
            println!();
        }
        return Ok(());
    }

    let paths = resolve_runtime_paths(runtime)?;
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", paths.diagnostics());
    }
    let config = load_config(&paths.config_path)?;
    let credentials = load_credentials(&paths, &config)?;
    let client = HmvClient::new(HmvClientConfig::from_config(&config))?;
    client.login(&credentials).await?;

    let result = match (&args.vm, &args.flag) {
        (Some(vm), _) if args.writeups => run_writeups(&client, vm, args.json).await,
        (Some(vm), Some(flag)) => run_flag(&client, vm, flag, args.json).await,
        _ => match &args.download {
            Some(vm) => run_download(&client, vm, args.json).await,
            None => run_listing(&client, &config, &args).await,
        },
    };
    debug!(requests = client.request_count(), "session finished");
    result
}

async fn run_writeups(client: &HmvClient, vm: &str, json: bool) -> Result<()> {
    match fetch_writeups(client, vm).await? {
        WriteupsOutcome::MachineNotFound => bail!("machine '{vm}' not found"),
        WriteupsOutcome::Found(writeups) if json => {
            println!("{}", serde_json::to_string_pretty(&writeups)?);
        }
        WriteupsOutcome::Found(writeups) if writeups.is_empty() => {
            println!("No community writeups found for {vm}.");
        }
        WriteupsOutcome::Found(writeups) => {
            println!("{}", render_writeups(vm, &writeups));
        }
    }
    Ok(())
}

async fn run_flag(client: &HmvClient, vm: &str, flag: &str, json: bool) -> Result<()> {
    let verdict = submit_flag(client, vm, flag).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
        return Ok(());
    }
    match verdict {
        FlagVerdict::Correct => println!("Correct! You hacked {vm}!"),
        FlagVerdict::Wrong => println!("Wrong flag. Try harder!"),
        FlagVerdict::MachineNotFound => {
            println!("Machine '{vm}' was not found. Check the VM name spelling.")
        }
        FlagVerdict::Unknown(body) => println!("Unknown server response: {body}"),
    }
    Ok(())
}

async fn run_download(client: &HmvClient, vm: &str, json: bool) -> Result<()> {
    let dest_dir = std::env::current_dir().context("failed to read current directory")?;
    let outcome = download_vm(client, vm, &dest_dir).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    let DownloadOutcome { url, path } = outcome;
    println!("{vm} is hosted on MEGA; download it from: {url}");
    println!("save it as: {}", normalize_for_display(&path));
    Ok(())
}

async fn run_listing(client: &HmvClient, config: &HmvConfig, args: &MachineArgs) -> Result<()> {
    let mut settings = config.catalog_settings();
    if args.no_status_sync {
        settings.reconcile_status = false;
    }
    let engine = CatalogEngine::new(client, settings);
    let request = args.aggregation_request();

    match engine.aggregate(&request).await? {
        CatalogOutcome::NoMatches if args.json => println!("[]"),
        CatalogOutcome::NoMatches => println!("{NO_MATCHES_MESSAGE}"),
        CatalogOutcome::Found(listing) if args.json => {
            println!("{}", serde_json::to_string_pretty(&listing.records)?);
        }
        CatalogOutcome::Found(listing) => {
            let title = listing_title(&listing, args.category(), args.search());
            println!("{}", render_machines(&title, &listing.records));
        }
    }
    Ok(())
}

fn listing_title(listing: &CatalogListing, category: Option<&str>, search: Option<&str>) -> String {
    let info = match listing.mode {
        AggregationMode::FullCatalog => listing.label.clone(),
        AggregationMode::SinglePage => format!("Page {}", listing.label),
    };
    let mut title = format!("HMV Machines ({info})");
    if let Some(category) = category {
        title.push_str(&format!(" | Filter: {}", category.to_uppercase()));
    }
    if let Some(search) = search {
        title.push_str(&format!(" | Search: '{search}'"));
    }
    title
}

fn render_machines(title: &str, records: &[Record]) -> String {
    let rows = records
        .iter()
        .map(|record| {
            vec![
                record.name.clone(),
                record.category.as_str().to_uppercase(),
                record.creator.clone(),
                record.size_label.clone(),
                record.status.label().to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        title,
        &["VM Name", "Difficulty", "Creator", "Size", "Status"],
        &rows,
    )
}

fn render_writeups(vm: &str, writeups: &[Writeup]) -> String {
    let rows = writeups
        .iter()
        .map(|writeup| {
            vec![
                writeup.date.clone(),
                writeup.author.clone(),
                writeup.language.clone(),
                writeup.format.to_uppercase(),
                writeup.url.clone(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(
        &format!("Community Writeups: {vm}"),
        &["Date", "Author", "Language", "Format", "Link"],
        &rows,
    )
}

fn render_table(title: &str, headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count())
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let separator = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join("  ");

    let mut lines = vec![title.to_string(), format_row(headers.to_vec()), separator];
    for row in rows {
        lines.push(format_row(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        home: runtime.home.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let state_env = initial.dotenv_path();
    if state_env.exists() {
        let _ = dotenvy::from_path(&state_env);
    }

    resolve_paths(&context, &overrides)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use hmv_core::catalog::{AggregationMode, CatalogFilter, CatalogListing};
    use hmv_core::model::{Category, Platform, Record, Status};

    use std::io::Cursor;

    use super::{Cli, Commands, listing_title, prompt, render_machines, render_table};

    fn record(name: &str, status: Status) -> Record {
        Record {
            name: name.to_string(),
            creator: "sml".to_string(),
            size_label: "350 MB".to_string(),
            category: Category::Beginner,
            platform: Platform::Linux,
            status,
        }
    }

    #[test]
    fn machine_flags_parse_into_request() {
        let cli = Cli::parse_from(["hmv", "machine", "-s", "Linux", "-a", "-n", "gift", "-p", "3"]);
        let Some(Commands::Machine(args)) = cli.command else {
            panic!("expected machine command");
        };
        let request = args.aggregation_request();
        assert_eq!(
            request.filter,
            Some(CatalogFilter::Platform(Platform::Linux))
        );
        assert_eq!(request.search.as_deref(), Some("gift"));
        assert_eq!(request.page, 3);
        assert!(request.fetch_all);
        assert!(args.wants_listing());
    }

    #[test]
    fn blank_sort_and_search_are_ignored() {
        let cli = Cli::parse_from(["hmv", "machine", "-s", "  ", "-n", ""]);
        let Some(Commands::Machine(args)) = cli.command else {
            panic!("expected machine command");
        };
        assert!(!args.wants_listing());
        let request = args.aggregation_request();
        assert_eq!(request.filter, None);
        assert_eq!(request.search, None);
    }

    #[test]
    fn search_keeps_surrounding_spaces() {
        let cli = Cli::parse_from(["hmv", "machine", "-n", " gift"]);
        let Some(Commands::Machine(args)) = cli.command else {
            panic!("expected machine command");
        };
        assert_eq!(args.aggregation_request().search.as_deref(), Some(" gift"));
    }

    #[test]
    fn prompt_reads_one_trimmed_line() {
        let mut input = Cursor::new("  ouba \r\nrest\n");
        assert_eq!(prompt(&mut input, "Username").expect("prompt"), "ouba");
    }

    #[test]
    fn vm_short_flag_does_not_clash_with_verbose() {
        let cli = Cli::parse_from(["hmv", "--verbose", "machine", "-v", "Gift", "-w"]);
        assert!(cli.verbose);
        let Some(Commands::Machine(args)) = cli.command else {
            panic!("expected machine command");
        };
        assert_eq!(args.vm.as_deref(), Some("Gift"));
        assert!(args.writeups);
    }

    #[test]
    fn titles_follow_listing_mode() {
        let single = CatalogListing {
            records: Vec::new(),
            label: "2/12".to_string(),
            mode: AggregationMode::SinglePage,
        };
        assert_eq!(
            listing_title(&single, Some("beginner"), None),
            "HMV Machines (Page 2/12) | Filter: BEGINNER"
        );

        let full = CatalogListing {
            records: Vec::new(),
            label: "Total Found: 4".to_string(),
            mode: AggregationMode::FullCatalog,
        };
        assert_eq!(
            listing_title(&full, None, Some("gi")),
            "HMV Machines (Total Found: 4) | Search: 'gi'"
        );
    }

    #[test]
    fn machine_table_aligns_columns() {
        let rendered = render_machines(
            "HMV Machines (Page 1/1)",
            &[
                record("Gift", Status::Completed),
                record("Deeper", Status::Pending),
            ],
        );
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "HMV Machines (Page 1/1)");
        assert!(lines[1].starts_with("VM Name  Difficulty"));
        assert!(lines[3].starts_with("Gift     BEGINNER"));
        assert!(lines[3].ends_with("DONE"));
        assert!(lines[4].ends_with("TO HACK"));
    }

    #[test]
    fn table_without_rows_keeps_header() {
        let rendered = render_table("Empty", &["A", "B"], &[]);
        assert_eq!(rendered, "Empty\nA  B\n-  -");
    }
}
