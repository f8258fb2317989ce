use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Context;
use colored::Colorize;
use rand::Rng;
use serde::Serialize;
use strata_repo::{
    CollectReport, ExternalId, FieldKind, FieldReader, RepoError, Repository, RepositoryConfig,
    Rid, StreamHandle,
};
use strata_schema::{ResourceTypeSchema, TypeRegistry};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Demo => cmd_demo(config, cli.format),
        Command::Layout(args) => cmd_layout(args, cli.format),
        Command::Stress(args) => cmd_stress(config, args, cli.format),
        Command::Config => cmd_config(&config, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RepositoryConfig> {
    let Some(path) = path else {
        return Ok(RepositoryConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: RepositoryConfig =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(config: &RepositoryConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// layout
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FieldRow {
    index: u32,
    name: String,
    kind: FieldKind,
    value_type: String,
    offset: usize,
    size: usize,
}

#[derive(Serialize)]
struct LayoutReport {
    name: String,
    tag: String,
    size: usize,
    alignment: usize,
    fields: Vec<FieldRow>,
}

fn cmd_layout(args: LayoutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.schema)
        .with_context(|| format!("reading schema {}", args.schema.display()))?;
    let schema: ResourceTypeSchema = toml::from_str(&text)
        .with_context(|| format!("parsing schema {}", args.schema.display()))?;
    let resource_type = TypeRegistry::new().create_type(&schema)?;

    let report = LayoutReport {
        name: resource_type.name().to_string(),
        tag: resource_type.tag().to_string(),
        size: resource_type.size(),
        alignment: resource_type.alignment(),
        fields: resource_type
            .fields()
            .iter()
            .map(|f| FieldRow {
                index: f.index,
                name: f.name.clone(),
                kind: f.kind,
                value_type: f.value_type.name().to_string(),
                offset: f.offset,
                size: f.value_type.size(),
            })
            .collect(),
    };

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "{} {} (tag {}, {} bytes, align {})",
        "Type".bold(),
        report.name.cyan().bold(),
        report.tag.dimmed(),
        report.size,
        report.alignment
    );
    println!(
        "  {:>5}  {:<20} {:<14} {:<14} {:>6}  {:>4}",
        "index", "name", "kind", "handler", "offset", "size"
    );
    for row in &report.fields {
        println!(
            "  {:>5}  {:<20} {:<14} {:<14} {:>6}  {:>4}",
            row.index,
            row.name,
            row.kind.to_string(),
            row.value_type,
            row.offset,
            row.size
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// demo
// ---------------------------------------------------------------------------

const HEALTH: u32 = 0;
const ARMOR: u32 = 1;
const COMPONENTS: u32 = 2;
const MESH: u32 = 3;

#[derive(Serialize)]
struct ResourceSummary {
    rid: String,
    version: u32,
    health: Option<u32>,
    health_inherited: bool,
    armor: Option<u32>,
    components: Vec<String>,
}

#[derive(Serialize)]
struct DemoSummary {
    prototype: ResourceSummary,
    instance: ResourceSummary,
    collected: CollectReport,
}

fn summarize(repo: &Repository, rid: Rid) -> anyhow::Result<ResourceSummary> {
    let read = repo.read(rid)?;
    let health_inherited = read
        .get_value(HEALTH)?
        .is_some_and(|value| value.is_inherited());
    Ok(ResourceSummary {
        rid: rid.to_string(),
        version: repo.version(rid)?,
        health: read.get::<u32>(HEALTH)?,
        health_inherited,
        armor: read.get::<u32>(ARMOR)?,
        components: read
            .sub_object_set(COMPONENTS)?
            .iter()
            .map(Rid::to_string)
            .collect(),
    })
}

fn print_summary(label: &str, summary: &ResourceSummary) {
    println!("{} {} (version {})", label.bold(), summary.rid.cyan(), summary.version);
    let health = summary
        .health
        .map_or_else(|| "-".to_string(), |h| h.to_string());
    let origin = if summary.health_inherited {
        " (inherited)".dimmed().to_string()
    } else {
        String::new()
    };
    println!("  Health:     {}{}", health.yellow(), origin);
    let armor = summary.armor.map_or_else(|| "-".to_string(), |a| a.to_string());
    println!("  Armor:      {}", armor.yellow());
    println!("  Components: [{}]", summary.components.join(", "));
}

fn cmd_demo(config: RepositoryConfig, format: OutputFormat) -> anyhow::Result<()> {
    let repo = Repository::new(config)?;
    let entity = repo.create_resource_type(
        &ResourceTypeSchema::new("Entity")
            .value("Health", HEALTH, "u32")
            .value("Armor", ARMOR, "u32")
            .sub_object_set("Components", COMPONENTS)
            .stream("Mesh", MESH),
    )?;
    let component = repo.create_resource_type(
        &ResourceTypeSchema::new("Component").value("Weight", 0, "f32"),
    )?;

    let prototype = repo.create_resource_with_id(entity, ExternalId::new())?;
    repo.set_path("prefabs/soldier", prototype)?;
    let sword = repo.create_resource(component)?;
    let shield = repo.create_resource(component)?;
    repo.update(prototype, |write| {
        write.set(HEALTH, &100u32)?;
        write.set(ARMOR, &5u32)?;
        write.set_stream(MESH, StreamHandle::new(1, 0xbeef))?;
        write.add_to_sub_object_set(COMPONENTS, &[sword, shield])
    })?;

    let instance = repo.create_from_prototype(prototype)?;
    let helmet = repo.create_resource(component)?;
    repo.update(instance, |write| {
        write.set(ARMOR, &9u32)?;
        write.remove_from_prototype_sub_object_set(COMPONENTS, &[shield])?;
        write.add_to_sub_object_set(COMPONENTS, &[helmet])
    })?;

    // Editing an owned component bumps its owner's version too.
    repo.update(sword, |write| write.set(0, &3.5f32))?;

    let prototype_summary = summarize(&repo, prototype)?;
    let instance_summary = summarize(&repo, instance)?;

    repo.destroy_resource(instance)?;
    let collected = repo.garbage_collect();

    let summary = DemoSummary {
        prototype: prototype_summary,
        instance: instance_summary,
        collected,
    };
    if format == OutputFormat::Json {
        return print_json(&summary);
    }

    print_summary("Prototype", &summary.prototype);
    print_summary("Instance ", &summary.instance);
    println!(
        "{} destroyed {} resources, released {} snapshots",
        "✓".green().bold(),
        summary.collected.resources_destroyed,
        summary.collected.snapshots_released
    );
    println!(
        "  {} alive: {}, path prefabs/soldier → {}",
        "Resources".bold(),
        repo.resource_count(),
        repo.get_by_path("prefabs/soldier")
            .map_or_else(|| "-".to_string(), |rid| rid.to_string())
            .cyan()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// stress
// ---------------------------------------------------------------------------

const VALUE: u32 = 0;
const MIRROR: u32 = 1;

#[derive(Serialize)]
struct StressReport {
    resources: usize,
    writers: usize,
    readers: usize,
    elapsed_ms: u128,
    commits: u64,
    conflicts: u64,
    reads: u64,
    torn_reads: u64,
    version_total: u64,
    collected: CollectReport,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    conflicts: AtomicU64,
    reads: AtomicU64,
    torn_reads: AtomicU64,
}

fn stress_writer(repo: &Repository, rids: &[Rid], args: &StressArgs, counters: &Counters) {
    let mut rng = rand::thread_rng();
    for _ in 0..args.commits {
        let rid = rids[rng.gen_range(0..rids.len())];
        let result = if args.rebase {
            repo.update(rid, |write| {
                let next = write.get::<u64>(VALUE)?.unwrap_or(0) + 1;
                write.set(VALUE, &next)?;
                write.set(MIRROR, &next)
            })
        } else {
            repo.write(rid).and_then(|mut write| {
                let next = write.get::<u64>(VALUE)?.unwrap_or(0) + 1;
                write.set(VALUE, &next)?;
                write.set(MIRROR, &next)?;
                write.commit()
            })
        };
        match result {
            Ok(_) => {
                counters.commits.fetch_add(1, Ordering::Relaxed);
            }
            Err(RepoError::CommitConflict { .. }) => {
                counters.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => tracing::error!(rid = %rid, %error, "stress write failed"),
        }
    }
}

fn stress_reader(repo: &Repository, rids: &[Rid], done: &AtomicBool, counters: &Counters) {
    let mut rng = rand::thread_rng();
    while !done.load(Ordering::Acquire) {
        let rid = rids[rng.gen_range(0..rids.len())];
        let Ok(read) = repo.read(rid) else { continue };
        let value = read.get::<u64>(VALUE).ok().flatten();
        let mirror = read.get::<u64>(MIRROR).ok().flatten();
        counters.reads.fetch_add(1, Ordering::Relaxed);
        if value != mirror {
            counters.torn_reads.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn cmd_stress(config: RepositoryConfig, args: StressArgs, format: OutputFormat) -> anyhow::Result<()> {
    anyhow::ensure!(args.resources > 0, "--resources must be at least 1");
    let repo = Repository::new(config)?;
    let counter = repo.create_resource_type(
        &ResourceTypeSchema::new("Counter")
            .value("Value", VALUE, "u64")
            .value("Mirror", MIRROR, "u64"),
    )?;
    let rids = (0..args.resources)
        .map(|_| repo.create_resource(counter))
        .collect::<Result<Vec<_>, _>>()?;

    let counters = Counters::default();
    let done = AtomicBool::new(false);
    let mut collected = CollectReport::default();
    let started = Instant::now();

    std::thread::scope(|s| {
        let writers: Vec<_> = (0..args.writers)
            .map(|_| s.spawn(|| stress_writer(&repo, &rids, &args, &counters)))
            .collect();
        for _ in 0..args.readers {
            s.spawn(|| stress_reader(&repo, &rids, &done, &counters));
        }
        let collector = s.spawn(|| {
            let mut total = CollectReport::default();
            while !done.load(Ordering::Acquire) {
                total += repo.garbage_collect();
                std::thread::yield_now();
            }
            total
        });

        for writer in writers {
            let _ = writer.join();
        }
        done.store(true, Ordering::Release);
        if let Ok(total) = collector.join() {
            collected += total;
        }
    });
    collected += repo.garbage_collect();
    let elapsed = started.elapsed();

    let version_total = rids
        .iter()
        .map(|&rid| repo.version(rid).map(u64::from))
        .sum::<Result<u64, _>>()?;
    let report = StressReport {
        resources: args.resources,
        writers: args.writers,
        readers: args.readers,
        elapsed_ms: elapsed.as_millis(),
        commits: counters.commits.load(Ordering::Relaxed),
        conflicts: counters.conflicts.load(Ordering::Relaxed),
        reads: counters.reads.load(Ordering::Relaxed),
        torn_reads: counters.torn_reads.load(Ordering::Relaxed),
        version_total,
        collected,
    };

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    let status = if report.torn_reads == 0 && report.version_total == report.commits {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} {} commits, {} conflicts, {} reads in {} ms",
        status,
        report.commits.to_string().bold(),
        report.conflicts.to_string().yellow(),
        report.reads,
        report.elapsed_ms
    );
    println!("  Torn reads:      {}", report.torn_reads);
    println!("  Version total:   {}", report.version_total);
    println!(
        "  Collected:       {} snapshots, {} resources",
        report.collected.snapshots_released, report.collected.resources_destroyed
    );
    Ok(())
}
