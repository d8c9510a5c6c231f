use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

fn snapshot_arg() -> Arg {
    Arg::new("snapshot")
        .long("snapshot")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Snapshot JSON file")
}

fn revision_arg() -> Arg {
    Arg::new("revision")
        .long("revision")
        .required(true)
        .help("Revision id")
}

fn project_arg() -> Arg {
    Arg::new("project")
        .long("project")
        .required(true)
        .help("Project id")
}

fn actor_arg() -> Arg {
    Arg::new("actor")
        .long("actor")
        .default_value("cli")
        .help("Who performs the action")
}

fn cli() -> Command {
    Command::new("blueprint")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Versioned element specifications with draft/approval workflow")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Service configuration (TOML)"),
        )
        .arg(
            Arg::new("state")
                .long("state")
                .global(true)
                .default_value("blueprint.json")
                .value_parser(value_parser!(PathBuf))
                .help("State file (versions and derived rows) used by workflow commands"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter, overrides RUST_LOG (e.g. debug, blueprint_store=trace)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("patch")
                .about("Apply a patch list to a snapshot and print the result")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("ops")
                        .long("ops")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of patch ops"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a snapshot against the validation rules")
                .arg(snapshot_arg()),
        )
        .subcommand(
            Command::new("project")
                .about("Rebuild a snapshot in memory and print the derived row counts")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("name")
                        .long("name")
                        .default_value("element")
                        .help("Element name"),
                ),
        )
        .subcommand(
            Command::new("digest")
                .about("Print the knowledge digest of a snapshot")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("name")
                        .long("name")
                        .default_value("element")
                        .help("Element name"),
                ),
        )
        .subcommand(
            Command::new("element")
                .about("Element lifecycle")
                .subcommand_required(true)
                .subcommand(
                    Command::new("new")
                        .about("Create an element")
                        .arg(
                            Arg::new("project")
                                .long("project")
                                .help("Project id; a new project is created when omitted"),
                        )
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(
                            Arg::new("seed")
                                .long("seed")
                                .value_parser(value_parser!(PathBuf))
                                .help("Initial snapshot JSON file"),
                        )
                        .arg(actor_arg()),
                )
                .subcommand(
                    Command::new("list")
                        .about("Elements of a project")
                        .arg(project_arg()),
                )
                .subcommand(
                    Command::new("publish")
                        .about("Publish the active version")
                        .arg(Arg::new("element").long("element").required(true)),
                )
                .subcommand(
                    Command::new("archive")
                        .about("Archive an element")
                        .arg(Arg::new("element").long("element").required(true)),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete an element and its history")
                        .arg(Arg::new("element").long("element").required(true)),
                ),
        )
        .subcommand(
            Command::new("draft")
                .about("Drafts")
                .subcommand_required(true)
                .subcommand(
                    Command::new("new")
                        .about("Open a draft (reuses an open one for the tab)")
                        .arg(project_arg())
                        .arg(Arg::new("tab").long("tab").required(true))
                        .arg(Arg::new("action").long("action").default_value("edit"))
                        .arg(
                            Arg::new("force-new")
                                .long("force-new")
                                .action(ArgAction::SetTrue)
                                .help("Always create a new draft"),
                        ),
                ),
        )
        .subcommand(
            Command::new("stage")
                .about("Stage a patch or a proposed snapshot for an element")
                .arg(revision_arg())
                .arg(Arg::new("element").long("element").required(true))
                .arg(
                    Arg::new("base")
                        .long("base")
                        .help("Base version id; defaults to the element's current version"),
                )
                .arg(
                    Arg::new("unpinned")
                        .long("unpinned")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("base")
                        .help("Stage without a base version (replays on whatever is live)"),
                )
                .arg(
                    Arg::new("ops")
                        .long("ops")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("proposed")
                        .required_unless_present("proposed")
                        .help("JSON array of patch ops"),
                )
                .arg(
                    Arg::new("proposed")
                        .long("proposed")
                        .value_parser(value_parser!(PathBuf))
                        .help("Proposed snapshot JSON file"),
                )
                .arg(
                    Arg::new("mask")
                        .long("mask")
                        .requires("proposed")
                        .value_delimiter(',')
                        .help("Sections taken from the proposed snapshot (e.g. tasks,materials)"),
                ),
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a draft")
                .arg(revision_arg())
                .arg(actor_arg()),
        )
        .subcommand(
            Command::new("discard")
                .about("Reject a draft")
                .arg(revision_arg())
                .arg(actor_arg()),
        )
        .subcommand(
            Command::new("preview")
                .about("Show what approving a draft would produce")
                .arg(revision_arg()),
        )
        .subcommand(
            Command::new("drafts")
                .about("List open drafts of a project")
                .arg(project_arg()),
        )
        .subcommand(
            Command::new("history")
                .about("List an element's versions, newest first")
                .arg(Arg::new("element").long("element").required(true)),
        )
        .subcommand(
            Command::new("rows")
                .about("Print an element's derived rows and its sync marker")
                .arg(Arg::new("element").long("element").required(true)),
        )
        .subcommand(
            Command::new("rebuild")
                .about("Rebuild a project's derived rows and print the outcome")
                .arg(project_arg())
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Bypass the sync guard"),
                ),
        )
}

fn init_tracing(matches: &ArgMatches) {
    let filter = match matches.get_one::<String>("log-level") {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if matches.get_flag("log-json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(&matches);
    commands::run(&matches).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn stage_requires_ops_or_proposed() {
        let err = cli()
            .try_get_matches_from(["blueprint", "stage", "--revision", "r", "--element", "e"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn mask_splits_on_commas() {
        let matches = cli()
            .try_get_matches_from([
                "blueprint",
                "stage",
                "--revision",
                "r",
                "--element",
                "e",
                "--proposed",
                "p.json",
                "--mask",
                "tasks,materials",
            ])
            .unwrap();
        let (_, stage) = matches.subcommand().unwrap();
        let mask: Vec<&String> = stage.get_many::<String>("mask").unwrap().collect();
        assert_eq!(mask, ["tasks", "materials"]);
    }
}
