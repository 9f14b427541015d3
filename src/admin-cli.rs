//! Administration tool for assemblies: create them, issue tickets, and count votes.
//! It reads the same `Rocket.toml` / `ROCKET_*` configuration as the server and
//! talks to the same record store.

use std::io;
use std::path::{Path, PathBuf};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rocket::figment::{providers::Serialized, Figment};
use thiserror::Error;

use assembly_vote::{
    config::{open_store, StoreBackend},
    model::{assembly_results, Assembly, AssemblyResults, AssemblySpec, DuplicateProposal, Id},
    store::{RecordKey, RecordStore},
    Config,
};

const PROGRAM_NAME: &str = "assembly-admin";

const ABOUT_TEXT: &str = "Manage assemblies and their voting tickets.

Settings are read from Rocket.toml and ROCKET_* environment variables.

EXIT CODES:
     0: Success.
     1: Error.";

const CREATE_ASSEMBLY: &str = "create-assembly";
const ISSUE_TICKETS: &str = "issue-tickets";
const TALLY: &str = "tally";

const DATA_DIR: &str = "DATA_DIR";
const SERVER_URL: &str = "SERVER_URL";
const SPEC_PATH: &str = "SPEC_PATH";
const ASSEMBLY_ID: &str = "ASSEMBLY_ID";
const COUNT: &str = "COUNT";

const SPEC_PATH_HELP: &str = "A JSON file describing the assembly, as\n\
`{\"name\": ..., \"proposals\": [{\"title\": ..., \"text\": ...}]}`.\n\
A proposal may also carry its own \"id\", such as \"P1\".\n\
If omitted, a stub assembly is created for editing by hand";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let assembly_id = Arg::new(ASSEMBLY_ID)
        .help("ID of the assembly")
        .value_parser(value_parser!(Id))
        .action(ArgAction::Set)
        .required(true);

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .arg(
            Arg::new(DATA_DIR)
                .long("data-dir")
                .help("Override the configured `data_dir`")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Set)
                .global(true),
        )
        .arg(
            Arg::new(SERVER_URL)
                .long("server-url")
                .help("Override the configured `server_url`")
                .action(ArgAction::Set)
                .global(true),
        )
        .subcommand(
            Command::new(CREATE_ASSEMBLY)
                .about("Create an assembly and print its ID")
                .arg(Arg::new(SPEC_PATH).help(SPEC_PATH_HELP).value_parser(value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new(ISSUE_TICKETS)
                .about("Issue tickets for an assembly and print one ticket URL per line")
                .arg(assembly_id.clone())
                .arg(
                    Arg::new(COUNT)
                        .help("Number of tickets to issue")
                        .value_parser(value_parser!(u64).range(1..))
                        .default_value("1"),
                ),
        )
        .subcommand(
            Command::new(TALLY)
                .about("Print turnout and vote counts for an assembly")
                .arg(assembly_id),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Error)]
enum Error {
    #[error("Cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid assembly spec: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Invalid assembly spec: {0}")]
    Duplicate(#[from] DuplicateProposal),
    #[error(transparent)]
    Backend(#[from] assembly_vote::error::Error),
}

/// Load the configuration. Settings given on the command line take precedence
/// over every other source.
fn load_config(args: &ArgMatches) -> Result<(Figment, Config), Error> {
    let mut figment = rocket::Config::figment();
    if let Some(dir) = args.get_one::<PathBuf>(DATA_DIR) {
        figment = figment.merge(Serialized::global("data_dir", dir));
    }
    if let Some(url) = args.get_one::<String>(SERVER_URL) {
        figment = figment.merge(Serialized::global("server_url", url));
    }
    let config = Config::load(&figment)?;
    Ok((figment, config))
}

/// Store a new assembly, from a spec file or as a stub.
async fn create_assembly(
    store: &dyn RecordStore,
    config: &Config,
    spec_path: Option<&Path>,
) -> Result<Vec<String>, Error> {
    let spec = match spec_path {
        Some(path) => {
            let json = rocket::tokio::fs::read_to_string(path)
                .await
                .map_err(|source| Error::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            serde_json::from_str::<AssemblySpec>(&json)?
        }
        None => AssemblySpec::stub(),
    };
    let assembly = Assembly::try_from(spec)?;
    store.put_assembly(&assembly).await?;

    let mut output = vec![format!("Assembly ID: {}", assembly.id)];
    if spec_path.is_none() && config.store() == StoreBackend::File {
        let name = RecordKey::assembly(assembly.id).name();
        let path = config.data_dir().join(format!("{name}.json"));
        output.push(format!("Please edit: {}", path.display()));
    }
    Ok(output)
}

/// Issue tickets for an existing assembly.
async fn issue_tickets(
    store: &dyn RecordStore,
    config: &Config,
    assembly_id: Id,
    count: u64,
) -> Result<Vec<String>, Error> {
    // Refuse to issue tickets for an assembly that doesn't exist.
    let assembly = store.get_assembly(assembly_id).await?;
    let mut urls = Vec::new();
    for _ in 0..count {
        let ticket = store.create_ticket(assembly.id).await?;
        urls.push(config.ticket_url(&ticket));
    }
    Ok(urls)
}

/// A human-readable summary of the results.
fn format_results(results: &AssemblyResults) -> Vec<String> {
    let mut output = vec![
        format!("{} ({})", results.name, results.assembly_id),
        format!(
            "Tickets issued: {}, votes cast: {}",
            results.tickets_issued, results.votes_cast
        ),
    ];
    for proposal in &results.proposals {
        let counts = &proposal.counts;
        output.push(format!(
            "{}: {} yes, {} no, {} abstain",
            proposal.title, counts.yes, counts.no, counts.abstain
        ));
    }
    output
}

/// Carry out the requested subcommand, returning the lines to print.
async fn execute(args: &ArgMatches) -> Result<Vec<String>, Error> {
    // A subcommand is required.
    let (name, sub_args) = args.subcommand().unwrap();
    let (figment, config) = load_config(sub_args)?;
    let store = open_store(&figment, &config).await?;

    match name {
        CREATE_ASSEMBLY => {
            let spec_path = sub_args.get_one::<PathBuf>(SPEC_PATH);
            create_assembly(&*store, &config, spec_path.map(PathBuf::as_path)).await
        }
        ISSUE_TICKETS => {
            // Required and defaulted arguments are guaranteed to be present.
            let assembly_id = *sub_args.get_one::<Id>(ASSEMBLY_ID).unwrap();
            let count = *sub_args.get_one::<u64>(COUNT).unwrap();
            issue_tickets(&*store, &config, assembly_id, count).await
        }
        TALLY => {
            let assembly_id = *sub_args.get_one::<Id>(ASSEMBLY_ID).unwrap();
            let results = assembly_results(&*store, assembly_id).await?;
            Ok(format_results(&results))
        }
        _ => unreachable!("unknown subcommand {name}"),
    }
}

/// Run the command, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let runtime = match rocket::tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            return 1;
        }
    };
    match runtime.block_on(execute(args)) {
        Ok(output) => {
            for line in output {
                println!("{line}");
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
