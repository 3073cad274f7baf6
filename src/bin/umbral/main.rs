//! Command-line front end for join-order planning and parallel aggregation.
#![forbid(unsafe_code)]

mod config;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use umbral::exec::aggregate::{
    parse_aggregate, AggregateFunction, AggregateInput, DataChunkState, HashAggregateLocalState,
    HashAggregateSharedState, ValueVector,
};
use umbral::profile::profile_snapshot;
use umbral::query::{
    EnumeratorOutput, InMemoryStatistics, JoinOrderEnumerator, Predicate, QueryGraph, QueryNode,
    QueryPart, QueryRel, Value,
};

use crate::config::CliConfig;

const BATCH_ROWS: usize = 1_024;

#[derive(Parser, Debug)]
#[command(
    name = "umbral",
    version,
    about = "Join-order planning and parallel grouped aggregation",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "UMBRAL_CONFIG",
        value_name = "FILE",
        help = "Config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Print profiling counters to stderr")]
    profile: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate join orders for a JSON pattern and print the best plan.
    Plan(PlanCmd),
    /// Group a CSV file with several worker threads.
    Aggregate(AggregateCmd),
}

#[derive(Args, Debug)]
struct PlanCmd {
    #[arg(value_name = "PATTERN", help = "JSON file describing the pattern")]
    pattern: PathBuf,

    #[arg(long, help = "Disable hash-join moves")]
    no_hash_join: bool,

    #[arg(long, value_name = "N", help = "Candidates kept per subgraph")]
    max_plans: Option<usize>,
}

#[derive(Args, Debug)]
struct AggregateCmd {
    #[arg(value_name = "CSV", help = "Input CSV with a header row")]
    input: PathBuf,

    #[arg(
        long,
        value_name = "col1,col2",
        value_delimiter = ',',
        help = "Group-by columns"
    )]
    group_by: Vec<String>,

    #[arg(
        long = "agg",
        value_name = "fn:column",
        required = true,
        help = "Aggregate such as count:*, sum:price or count_distinct:city"
    )]
    aggregates: Vec<String>,

    #[arg(long, default_value_t = 4, help = "Worker threads")]
    threads: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// A pattern file: either one part at the top level or a list of parts.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PatternFile {
    nodes: Vec<QueryNode>,
    rels: Vec<QueryRel>,
    predicates: Vec<Predicate>,
    parts: Vec<PartSpec>,
    statistics: InMemoryStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartSpec {
    nodes: Vec<QueryNode>,
    rels: Vec<QueryRel>,
    predicates: Vec<Predicate>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("umbral=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if cli.profile {
        std::env::set_var("UMBRAL_PROFILE", "1");
    }
    let config = CliConfig::load(cli.config.clone())?;
    debug!(path = ?config.path(), "cli.config.loaded");

    match &cli.command {
        Command::Plan(cmd) => run_plan(cmd, &config, cli.format)?,
        Command::Aggregate(cmd) => run_aggregate(cmd, &config, cli.format)?,
    }

    if cli.profile {
        if let Some(snapshot) = profile_snapshot(false) {
            eprintln!("{snapshot:#?}");
        }
    }
    Ok(())
}

fn build_graph(nodes: &[QueryNode], rels: &[QueryRel]) -> umbral::Result<QueryGraph> {
    let mut graph = QueryGraph::new();
    for node in nodes {
        graph.add_query_node(node.clone())?;
    }
    for rel in rels {
        graph.add_query_rel(rel.clone())?;
    }
    Ok(graph)
}

fn run_plan(cmd: &PlanCmd, config: &CliConfig, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let contents = fs::read_to_string(&cmd.pattern)?;
    let pattern: PatternFile = serde_json::from_str(&contents)?;

    let mut planner = config.planner.clone();
    if cmd.no_hash_join {
        planner = planner.enable_hash_join(false);
    }
    if let Some(limit) = cmd.max_plans {
        planner = planner.max_plans_per_subgraph(limit);
    }
    let enumerator = JoinOrderEnumerator::new(planner, Arc::new(pattern.statistics));

    let output = if pattern.parts.is_empty() {
        let graph = build_graph(&pattern.nodes, &pattern.rels)?;
        enumerator.enumerate(&graph, &pattern.predicates)?
    } else {
        let parts = pattern
            .parts
            .iter()
            .map(|part| {
                Ok(QueryPart::new(
                    build_graph(&part.nodes, &part.rels)?,
                    part.predicates.clone(),
                ))
            })
            .collect::<umbral::Result<Vec<_>>>()?;
        enumerator.enumerate_parts(&parts)?
    };
    info!(
        candidates = output.plans.len(),
        plan_hash = output.plan_hash,
        "cli.plan.done"
    );
    print_plan(&output, format)
}

fn print_plan(output: &EnumeratorOutput, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "plan": output.explain,
                "candidates": output.plans.len(),
                "subgraphs_planned": output.subgraphs_planned,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            print!("{}", output.explain.render());
            println!(
                "cost={:.2} cardinality={:.2} candidates={} plan_hash={:#018x}",
                output.explain.cost,
                output.explain.cardinality,
                output.plans.len(),
                output.plan_hash
            );
        }
    }
    Ok(())
}

struct CsvInput {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

fn read_csv(path: &Path) -> umbral::Result<CsvInput> {
    let mut reader = csv::Reader::from_path(path)?;
    let columns = reader.headers()?.iter().map(str::to_owned).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(parse_cell).collect());
    }
    Ok(CsvInput { columns, rows })
}

fn parse_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() {
        Value::Null
    } else if let Ok(v) = cell.parse::<i64>() {
        Value::Int(v)
    } else if let Ok(v) = cell.parse::<f64>() {
        Value::Float(v)
    } else if let Ok(v) = cell.parse::<bool>() {
        Value::Bool(v)
    } else {
        Value::String(cell.to_owned())
    }
}

fn column_index(columns: &[String], name: &str) -> umbral::Result<usize> {
    columns
        .iter()
        .position(|column| column == name)
        .ok_or_else(|| umbral::UmbralError::InvalidArgument(format!("unknown column '{name}'")))
}

struct AggregatePlan {
    key_columns: Vec<usize>,
    input_columns: Vec<Option<usize>>,
    functions: Vec<Arc<dyn AggregateFunction>>,
}

fn run_aggregate(
    cmd: &AggregateCmd,
    config: &CliConfig,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let input = read_csv(&cmd.input)?;
    let key_columns = cmd
        .group_by
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| column_index(&input.columns, name))
        .collect::<umbral::Result<Vec<_>>>()?;
    let mut functions = Vec::new();
    let mut input_columns = Vec::new();
    let mut headers: Vec<String> = key_columns.iter().map(|&c| input.columns[c].clone()).collect();
    for spec in &cmd.aggregates {
        let (function, column) = parse_aggregate(spec)?;
        input_columns.push(match column {
            Some(name) => Some(column_index(&input.columns, &name)?),
            None => None,
        });
        headers.push(spec.clone());
        functions.push(function);
    }
    let plan = Arc::new(AggregatePlan {
        key_columns,
        input_columns,
        functions,
    });

    let shared = Arc::new(HashAggregateSharedState::new(
        plan.key_columns.len(),
        0,
        plan.functions.clone(),
        config.aggregate.clone(),
    )?);
    let threads = cmd.threads.max(1);
    let rows = Arc::new(input.rows);
    let chunk = rows.len().div_ceil(threads).max(1);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|worker| {
            let rows = Arc::clone(&rows);
            let shared = Arc::clone(&shared);
            let plan = Arc::clone(&plan);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> umbral::Result<usize> {
                let start = (worker * chunk).min(rows.len());
                let end = (start + chunk).min(rows.len());
                let produced = aggregate_rows(&rows[start..end], &plan, &shared);
                // Every worker reaches the barrier so no finalizer starts early.
                barrier.wait();
                let produced = produced?;
                let finalized = shared.finalize_partitions()?;
                debug!(worker, rows = end - start, finalized, "cli.aggregate.worker_done");
                Ok(produced)
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| "aggregation worker panicked")??;
    }
    // Workers that stopped early on an error leave partitions unclaimed.
    shared.finalize_partitions()?;

    let mut output = Vec::with_capacity(shared.num_rows());
    while let Some(range) = shared.get_next_range_to_read() {
        output.extend(shared.scan_rows(range.start, range.len())?);
    }
    output.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(groups = output.len(), threads, "cli.aggregate.done");
    print_groups(&headers, &output, format)
}

fn aggregate_rows(
    rows: &[Vec<Value>],
    plan: &AggregatePlan,
    shared: &Arc<HashAggregateSharedState>,
) -> umbral::Result<usize> {
    let mut local = HashAggregateLocalState::new(Arc::clone(shared))?;
    for batch in rows.chunks(BATCH_ROWS) {
        let state = Arc::new(DataChunkState::unflat(batch.len()));
        let column = |idx: usize| {
            ValueVector::new(
                batch.iter().map(|row| row.get(idx).cloned().unwrap_or(Value::Null)).collect(),
                Arc::clone(&state),
            )
        };
        let keys: Vec<ValueVector> = plan.key_columns.iter().map(|&idx| column(idx)).collect();
        let arguments: Vec<Option<ValueVector>> = plan
            .input_columns
            .iter()
            .map(|idx| idx.map(&column))
            .collect();
        let key_refs: Vec<&ValueVector> = keys.iter().collect();
        let inputs: Vec<AggregateInput<'_>> = arguments
            .iter()
            .map(|argument| AggregateInput {
                vector: argument.as_ref(),
            })
            .collect();
        local.append(&[], &key_refs, &[], &state, &inputs, 1)?;
    }
    local.finish()
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::from(*v),
        Value::Int(v) | Value::DateTime(v) => serde_json::Value::from(*v),
        Value::Float(v) => serde_json::Value::from(*v),
        other => serde_json::Value::from(other.to_string()),
    }
}

fn print_groups(
    headers: &[String],
    rows: &[Vec<Value>],
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => {
            let rows: Vec<Vec<serde_json::Value>> = rows
                .iter()
                .map(|row| row.iter().map(value_to_json).collect())
                .collect();
            let json = serde_json::json!({ "columns": headers, "rows": rows });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("{}", headers.join(","));
            for row in rows {
                let cells: Vec<String> = row.iter().map(Value::to_string).collect();
                println!("{}", cells.join(","));
            }
        }
    }
    Ok(())
}
