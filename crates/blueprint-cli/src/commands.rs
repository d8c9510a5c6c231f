//! Command implementations
//!
//! Offline commands (`patch`, `validate`, `project`, `digest`) work on JSON
//! files only. Workflow commands open the versions and derived rows from
//! `--state`, run through the element service, and write both back once
//! queued rebuilds have finished.

use anyhow::{bail, Context, Result};
use blueprint_core::{ElementService, ServiceConfig};
use blueprint_projection::{ProjectionStore, RebuildInput, RunTrigger};
use blueprint_snapshot::{apply_with_report, ElementSnapshot, PatchOp, Section, SnapshotDigest};
use blueprint_store::{Element, ElementId, ProjectId, RevisionId, StageRequest, VersionId};
use clap::ArgMatches;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub(crate) async fn run(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("patch", args)) => patch(args),
        Some(("validate", args)) => validate(args),
        Some(("project", args)) => project(args),
        Some(("digest", args)) => digest(args),
        Some((name, args)) => workflow(matches, name, args).await,
        None => bail!("no command given"),
    }
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> Result<&'a T> {
    args.get_one::<T>(name)
        .with_context(|| format!("missing --{name}"))
}

fn parse_id<T>(args: &ArgMatches, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = required::<String>(args, name)?;
    raw.parse()
        .with_context(|| format!("invalid --{name} '{raw}'"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_mask(args: &ArgMatches) -> Result<Vec<Section>> {
    args.get_many::<String>("mask")
        .into_iter()
        .flatten()
        .map(|s| s.trim().parse::<Section>().map_err(anyhow::Error::from))
        .collect()
}

// -- offline --

fn patch(args: &ArgMatches) -> Result<()> {
    let snapshot: ElementSnapshot = read_json(required::<PathBuf>(args, "snapshot")?)?;
    let ops: Vec<PatchOp> = read_json(required::<PathBuf>(args, "ops")?)?;
    let report = apply_with_report(&snapshot, &ops)?;
    if !report.pruned_tasks.is_empty() {
        tracing::info!(pruned = ?report.pruned_tasks, "blank tasks removed");
    }
    print_json(&report.snapshot)
}

fn validate(args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "snapshot")?;
    let snapshot: ElementSnapshot = read_json(path)?;
    snapshot
        .validate()
        .with_context(|| format!("{} is invalid", path.display()))?;
    println!("{}: ok", path.display());
    Ok(())
}

fn project(args: &ArgMatches) -> Result<()> {
    let snapshot: ElementSnapshot = read_json(required::<PathBuf>(args, "snapshot")?)?;
    let element = Element::new(ProjectId::new(), required::<String>(args, "name")?.as_str());
    let projection = ProjectionStore::new();
    let run = projection.rebuild(&RebuildInput {
        element: &element,
        version_id: VersionId::new(),
        snapshot: &snapshot,
        trigger: RunTrigger::Manual,
    })?;
    print_json(&serde_json::json!({
        "summary": run.summary,
        "rows": projection.counts(element.id),
    }))
}

fn digest(args: &ArgMatches) -> Result<()> {
    let snapshot: ElementSnapshot = read_json(required::<PathBuf>(args, "snapshot")?)?;
    let name = required::<String>(args, "name")?;
    print!("{}", SnapshotDigest::default().render(name, &snapshot));
    Ok(())
}

// -- workflow --

async fn workflow(global: &ArgMatches, name: &str, args: &ArgMatches) -> Result<()> {
    let state = required::<PathBuf>(global, "state")?.clone();
    let config = match global.get_one::<PathBuf>("config") {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let service = ElementService::open(config, &state)
        .with_context(|| format!("cannot load state {}", state.display()))?;

    let changed = match name {
        "element" => element(&service, args)?,
        "draft" => draft(&service, args)?,
        "stage" => stage(&service, args)?,
        "approve" => {
            let revision: RevisionId = parse_id(args, "revision")?;
            let approval = service
                .approve(revision, required::<String>(args, "actor")?)
                .await?;
            print_json(&approval)?;
            true
        }
        "discard" => {
            let revision: RevisionId = parse_id(args, "revision")?;
            print_json(&service.discard(revision, required::<String>(args, "actor")?)?)?;
            true
        }
        "preview" => {
            print_json(&service.preview_snapshots(parse_id(args, "revision")?)?)?;
            false
        }
        "drafts" => {
            print_json(&service.list_drafts(parse_id(args, "project")?))?;
            false
        }
        "history" => {
            print_json(&service.history(parse_id(args, "element")?)?)?;
            false
        }
        "rebuild" => {
            let project: ProjectId = parse_id(args, "project")?;
            let outcome = service.rebuild_now(project, args.get_flag("force"));
            print_json(&outcome)?;
            service.save(&state).await?;
            if !outcome.is_clean() {
                bail!("{} element(s) failed to rebuild", outcome.failed.len());
            }
            false
        }
        "rows" => {
            let element: ElementId = parse_id(args, "element")?;
            let projection = service.projection();
            print_json(&serde_json::json!({
                "section": projection.section(element),
                "materials": projection.materials(element),
                "work": projection.work(element),
                "tasks": projection.tasks(element),
                "lastSynced": projection.sync_marker(element),
            }))?;
            false
        }
        other => bail!("unknown command '{other}'"),
    };

    if changed {
        service
            .save(&state)
            .await
            .with_context(|| format!("cannot write state {}", state.display()))?;
    } else {
        service.flush().await?;
    }
    Ok(())
}

fn element(service: &ElementService, args: &ArgMatches) -> Result<bool> {
    match args.subcommand() {
        Some(("new", args)) => {
            let project = match args.get_one::<String>("project") {
                Some(_) => parse_id(args, "project")?,
                None => ProjectId::new(),
            };
            let seed = args
                .get_one::<PathBuf>("seed")
                .map(|p| read_json::<ElementSnapshot>(p))
                .transpose()?;
            let element = service.create_element(
                project,
                required::<String>(args, "name")?,
                seed,
                required::<String>(args, "actor")?,
            )?;
            print_json(&element)?;
            Ok(true)
        }
        Some(("list", args)) => {
            print_json(&service.store().elements(parse_id(args, "project")?))?;
            Ok(false)
        }
        Some(("publish", args)) => {
            let id: ElementId = parse_id(args, "element")?;
            match service.publish_element(id)? {
                Some(version) => println!("{id} published at {version}"),
                None => println!("{id} has no active version"),
            }
            Ok(true)
        }
        Some(("archive", args)) => {
            print_json(&service.archive_element(parse_id(args, "element")?)?)?;
            Ok(true)
        }
        Some(("delete", args)) => {
            let element = service.delete_element(parse_id(args, "element")?)?;
            println!("deleted {} ({})", element.id, element.name);
            Ok(true)
        }
        _ => bail!("unknown element command"),
    }
}

fn draft(service: &ElementService, args: &ArgMatches) -> Result<bool> {
    let Some(("new", args)) = args.subcommand() else {
        bail!("unknown draft command");
    };
    let handle = service.create_draft(
        parse_id(args, "project")?,
        required::<String>(args, "tab")?,
        required::<String>(args, "action")?,
        args.get_flag("force-new"),
    );
    if handle.reused {
        println!("{} (reused)", handle.revision_id);
        Ok(false)
    } else {
        println!("{}", handle.revision_id);
        Ok(true)
    }
}

fn stage(service: &ElementService, args: &ArgMatches) -> Result<bool> {
    let revision: RevisionId = parse_id(args, "revision")?;
    let element: ElementId = parse_id(args, "element")?;
    let base = if args.get_flag("unpinned") {
        None
    } else if args.get_one::<String>("base").is_some() {
        Some(parse_id::<VersionId>(args, "base")?)
    } else {
        service.store().element(element)?.current_version_id()
    };

    let request = match args.get_one::<PathBuf>("ops") {
        Some(path) => StageRequest::patch(element, base, read_json(path)?),
        None => {
            let proposed: ElementSnapshot = read_json(required::<PathBuf>(args, "proposed")?)?;
            StageRequest::snapshot(element, base, proposed).with_mask(parse_mask(args)?)
        }
    };
    let change = service.stage_change(revision, request)?;
    print_json(&change)?;
    Ok(true)
}
