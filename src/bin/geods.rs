use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use geodataset::config::{ClientConfig, ConfigLoader, FetchOptions, SearchOptions, split_option};
use geodataset::domain::{Accession, FileCategory, RecordType};
use geodataset::error::{ErrorKind, GeoError};
use geodataset::eutils::EutilsClient;
use geodataset::extract::ArchiveExtractor;
use geodataset::history::Selection;
use geodataset::listing::{FileFilter, FileListing, HttpFileServer};
use geodataset::output::JsonOutput;
use geodataset::paths::RemotePathResolver;
use geodataset::pipeline::{DownloadRequest, GeoDownloader};

#[derive(Parser)]
#[command(name = "geods")]
#[command(about = "Search NCBI GEO and download record files")]
#[command(version)]
struct Cli {
    /// Path to a geodataset.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run an esearch query and print the result")]
    Search(SearchArgs),
    #[command(about = "Print esummary output for the selected records")]
    Summary(SelectArgs),
    #[command(about = "Print efetch output for the selected records")]
    Fetch(FetchArgs),
    #[command(about = "Print elink output for the selected records")]
    Link(LinkArgs),
    #[command(about = "Print the remote directory of an accession")]
    Path(PathArgs),
    #[command(about = "List the files of an accession's remote directory")]
    List(ListArgs),
    #[command(about = "Download the files of an accession")]
    Download(DownloadArgs),
    #[command(about = "Extract a downloaded archive")]
    Extract(ExtractArgs),
}

#[derive(Args)]
struct SearchArgs {
    term: String,

    #[arg(long, default_value = "gds")]
    db: String,

    /// Restrict a gds search to one record type.
    #[arg(long = "type")]
    record_type: Option<RecordType>,

    /// Extra esearch option as key=value (retmax, retstart, usehistory, ...).
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,
}

#[derive(Args)]
struct SelectArgs {
    #[arg(long, default_value = "gds")]
    db: String,

    /// Record UIDs; repeat or comma-separate.
    #[arg(long = "id", value_delimiter = ',')]
    ids: Vec<String>,

    #[arg(long)]
    query_key: Option<String>,

    #[arg(long)]
    web_env: Option<String>,

    /// Run this search first and select its history.
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// efetch option as key=value (rettype, retmode, retstart, retmax).
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,
}

#[derive(Args)]
struct LinkArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(long, default_value = "gds")]
    dbfrom: String,
}

#[derive(Args)]
struct PathArgs {
    accession: String,
}

#[derive(Args)]
struct ListArgs {
    accession: String,

    /// Sub-directory of the record directory, e.g. suppl.
    #[arg(long)]
    subdir: Option<String>,

    #[arg(long = "category")]
    categories: Vec<FileCategory>,
}

#[derive(Args)]
struct DownloadArgs {
    accession: String,

    #[arg(long, default_value = ".")]
    out: Utf8PathBuf,

    #[arg(long = "category")]
    categories: Vec<FileCategory>,

    #[arg(long)]
    extract: bool,
}

#[derive(Args)]
struct ExtractArgs {
    archive: PathBuf,

    /// Defaults to the archive's directory.
    #[arg(long)]
    dest: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GeoError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeoError) -> u8 {
    match error.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::TransientTransport
        | ErrorKind::RetriesExhausted
        | ErrorKind::RemoteRejection => 3,
        ErrorKind::Integrity => 4,
        ErrorKind::Resource => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Search(args) => run_search(args, &config),
        Commands::Summary(args) => {
            let mut client = EutilsClient::new(&config)?;
            let selection = prepare_selection(&mut client, &args)?;
            let body = client.summary(&args.db, &selection)?;
            JsonOutput::print_raw(&body).into_diagnostic()
        }
        Commands::Fetch(args) => {
            let options = FetchOptions::from_pairs(parse_pairs(&args.options)?)?;
            let mut client = EutilsClient::new(&config)?;
            let selection = prepare_selection(&mut client, &args.select)?;
            let body = client.fetch(&args.select.db, &selection, &options)?;
            JsonOutput::print_raw(&body).into_diagnostic()
        }
        Commands::Link(args) => {
            let mut client = EutilsClient::new(&config)?;
            let selection = prepare_selection(&mut client, &args.select)?;
            let body = client.link(&args.dbfrom, &args.select.db, &selection)?;
            JsonOutput::print_raw(&body).into_diagnostic()
        }
        Commands::Path(args) => {
            let accession: Accession = args.accession.parse()?;
            let resolver = RemotePathResolver::new(&config.geo_root);
            println!("{}", resolver.record_dir(&accession));
            Ok(())
        }
        Commands::List(args) => run_list(args, &config),
        Commands::Download(args) => run_download(args, &config),
        Commands::Extract(args) => {
            let dest = match args.dest {
                Some(dest) => dest,
                None => args
                    .archive
                    .parent()
                    .map(|parent| parent.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            let produced = ArchiveExtractor::extract(&args.archive, &dest)?;
            JsonOutput::print_json(&produced).into_diagnostic()
        }
    }
}

fn run_search(args: SearchArgs, config: &ClientConfig) -> miette::Result<()> {
    let options = SearchOptions::from_pairs(parse_pairs(&args.options)?)?;
    let mut client = EutilsClient::new(config)?;
    let result = match args.record_type {
        Some(record_type) => client.search_records(record_type, &args.term, &options)?,
        None => client.search(&args.db, &args.term, &options)?,
    };
    JsonOutput::print_search(&result).into_diagnostic()
}

fn run_list(args: ListArgs, config: &ClientConfig) -> miette::Result<()> {
    let accession: Accession = args.accession.parse()?;
    let resolver = RemotePathResolver::new(&config.geo_root);
    let mut dir = resolver.record_dir(&accession);
    if let Some(subdir) = &args.subdir {
        dir = dir.join_dir(subdir);
    }
    let filter = if args.categories.is_empty() {
        FileFilter::All
    } else {
        FileFilter::Categories {
            categories: args.categories,
            accession,
        }
    };
    let mut session = HttpFileServer::connect(config)?;
    let entries = FileListing::new(config.retry.clone()).list(&mut session, &dir, &filter)?;
    session.close()?;
    JsonOutput::print_listing(&entries).into_diagnostic()
}

fn run_download(args: DownloadArgs, config: &ClientConfig) -> miette::Result<()> {
    let accession: Accession = args.accession.parse()?;
    let downloader = GeoDownloader::new(
        RemotePathResolver::new(&config.geo_root),
        config.retry.clone(),
    );
    let request = DownloadRequest {
        categories: args.categories,
        extract: args.extract,
    };
    let mut session = HttpFileServer::connect(config)?;
    let record = downloader.download_record(&mut session, &accession, &args.out, &request)?;
    session.close()?;
    JsonOutput::print_record(&record).into_diagnostic()
}

fn prepare_selection<T, S>(
    client: &mut EutilsClient<T, S>,
    args: &SelectArgs,
) -> miette::Result<Selection>
where
    T: geodataset::executor::Transport,
    S: geodataset::retry::Sleeper,
{
    if let Some(term) = &args.search {
        client.search(&args.db, term, &SearchOptions::default())?;
    }
    Ok(Selection {
        uids: args.ids.clone(),
        query_key: args.query_key.clone(),
        web_env: args.web_env.clone(),
    })
}

fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>, GeoError> {
    raw.iter().map(|item| split_option(item)).collect()
}
