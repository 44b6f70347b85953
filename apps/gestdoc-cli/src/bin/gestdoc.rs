use std::{env, fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gestdoc_core::config::Config;
use gestdoc_core::fragments::FragmentLoader;
use gestdoc_core::traits::{Embedder, RerankModel};
use gestdoc_core::types::{Fragment, ItemKind, ResultSet};
use gestdoc_embed::{get_default_embedder, get_default_reranker};
use gestdoc_retrieval::{RetrieveOptions, Retriever};
use gestdoc_text::TantivyFragmentIndex;
use gestdoc_vector::{LanceFragmentIndexer, LanceFragmentStore};

const EMBED_BATCH: usize = 32;

const USAGE: &str = "Usage:
  gestdoc ingest [FRAGMENTS_DIR] [--limit N] [--skip-vectors]
  gestdoc query <TEXT> [--module M] [--version V] [--top-k N] [--json]
  gestdoc classify <TEXT>";

#[derive(Debug, Default, PartialEq)]
struct Args {
    positional: Vec<String>,
    limit: Option<usize>,
    skip_vectors: bool,
    module: Option<String>,
    version: Option<String>,
    top_k: Option<usize>,
    json: bool,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    fn value<'a>(raw: &'a [String], i: &mut usize, name: &str) -> Result<&'a str> {
        *i += 1;
        raw.get(*i).map(String::as_str).ok_or_else(|| anyhow!("{name} requires a value"))
    }
    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--limit" => args.limit = Some(value(raw, &mut i, "--limit")?.parse().map_err(|_| anyhow!("--limit requires a number"))?),
            "--top-k" => args.top_k = Some(value(raw, &mut i, "--top-k")?.parse().map_err(|_| anyhow!("--top-k requires a number"))?),
            "--module" => args.module = Some(value(raw, &mut i, "--module")?.to_string()),
            "--version" => args.version = Some(value(raw, &mut i, "--version")?.to_string()),
            "--skip-vectors" => args.skip_vectors = true,
            "--json" => args.json = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            other => args.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let raw: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = raw.split_first() else { println!("{USAGE}"); return Ok(()); };
    let args = parse_args(rest)?;
    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {e}"); e })?;
    match command.as_str() {
        "ingest" => ingest(&config, &args).await,
        "query" => query(&config, &args).await,
        "classify" => classify(&config, &args),
        _ => { println!("{USAGE}"); bail!("unknown command '{command}'") }
    }
}

fn joined_text(args: &Args) -> Result<String> {
    if args.positional.is_empty() { bail!("missing query text\n{USAGE}"); }
    Ok(args.positional.join(" "))
}

async fn ingest(config: &Config, args: &Args) -> Result<()> {
    let data = config.data()?;
    let models = config.models()?;
    let fragments_dir = args.positional.first().map_or_else(|| data.fragments_path(), PathBuf::from);
    println!("gestdoc ingest\n==============");
    println!("Fragments directory: {}", fragments_dir.display());

    let loader = args.limit.map_or_else(FragmentLoader::new, FragmentLoader::with_file_limit);
    let fragments = loader.load_directory(&fragments_dir)?;
    if fragments.is_empty() { println!("No fragments found"); return Ok(()); }
    println!("📄 Loaded {} fragments", fragments.len());

    let tantivy_dir = data.tantivy_path();
    let index = TantivyFragmentIndex::create(tantivy_dir.clone())?;
    let count = index.index(&fragments)?;
    println!("📊 Indexed {} fragments into Tantivy at {}", count, tantivy_dir.display());

    if args.skip_vectors {
        println!("⚠️  Skipping LanceDB indexing (--skip-vectors flag)");
    } else {
        let embedder = get_default_embedder(models.embedder_path().as_deref())?;
        let embeddings = embed_all(embedder.as_ref(), &fragments)?;
        let lancedb_path = data.lancedb_path();
        if lancedb_path.exists() { fs::remove_dir_all(&lancedb_path)?; }
        fs::create_dir_all(&lancedb_path)?;
        let indexer = LanceFragmentIndexer::new(&lancedb_path, &data.lancedb_table).await?;
        let written = indexer.index(&fragments, &embeddings).await?;
        println!("📊 Indexed {} fragments into LanceDB at {}", written, lancedb_path.display());
    }
    println!("\n✅ Ingestion completed successfully!");
    println!("💡 To search, use: cargo run --bin gestdoc query '<domanda>'");
    Ok(())
}

fn embed_all(embedder: &dyn Embedder, fragments: &[Fragment]) -> Result<Vec<Vec<f32>>> {
    let pb = ProgressBar::new(fragments.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} embedded ({percent}%)") { pb.set_style(style.progress_chars("#>-")); }
    let mut embeddings = Vec::with_capacity(fragments.len());
    for batch in fragments.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(Fragment::embedding_text).collect();
        embeddings.extend(embedder.embed_batch(&texts)?);
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("embedded");
    Ok(embeddings)
}

fn load_reranker(config: &Config) -> Result<Option<Arc<dyn RerankModel>>> {
    let models = config.models()?;
    if models.disable_reranker { return Ok(None); }
    match get_default_reranker(models.reranker_path().as_deref()) {
        Ok(model) => Ok(Some(Arc::from(model))),
        Err(e) => {
            warn!(error = %e, "reranker unavailable, results keep fusion order");
            Ok(None)
        }
    }
}

async fn query(config: &Config, args: &Args) -> Result<()> {
    let text = joined_text(args)?;
    let data = config.data()?;
    let models = config.models()?;
    let settings = config.retrieval()?;

    let lexical = Arc::new(TantivyFragmentIndex::open(data.tantivy_path())?);
    let dense = LanceFragmentStore::open(&data.lancedb_path(), &data.lancedb_table).await?;
    let embedder: Arc<dyn Embedder> = Arc::from(get_default_embedder(models.embedder_path().as_deref())?);
    let mut retriever = Retriever::new(dense, Arc::clone(&lexical), lexical, embedder, settings)?;
    if let Some(reranker) = load_reranker(config)? { retriever = retriever.with_reranker(reranker); }

    let options = RetrieveOptions { version_filter: args.version.clone(), module_filter: args.module.clone(), top_k: args.top_k };
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() { on_interrupt.cancel(); }
    });
    let result = retriever.retrieve_with_cancel(&text, &options, &cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&text, &result);
    }
    Ok(())
}

fn print_result(query: &str, result: &ResultSet) {
    println!("🔍 \"{query}\" → {} ({} items, {} tokens)", result.category, result.len(), result.tokens_used);
    if result.degraded {
        let failed: Vec<String> = result.failed_sources.iter().map(ToString::to_string).collect();
        println!("⚠️  Degraded: {} backend unavailable", failed.join(", "));
    }
    if !result.reranked { println!("ℹ️  Fusion order (no rerank)"); }
    for (i, item) in result.items.iter().enumerate() {
        let c = &item.candidate;
        let label = match item.kind { ItemKind::Fragment => "", ItemKind::ParentSummary => " [sintesi]" };
        let score = c.rerank_score.map_or_else(|| format!("fused {:.4}", c.boosted_score()), |s| format!("rerank {s:.3}"));
        println!("\n{}. {}{} ({})", i + 1, c.fragment.title, label, score);
        println!("   {}", c.fragment.section_key());
        let preview: String = item.content.chars().take(240).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    if result.truncated { println!("\n✂️  Truncated at the token budget ({} candidates selected)", result.total_count); }
    println!("\nFonti:");
    for citation in result.citations() { println!("  - {citation}"); }
}

fn classify(config: &Config, args: &Args) -> Result<()> {
    let text = joined_text(args)?;
    let settings = config.retrieval()?;
    let classifier = gestdoc_retrieval::Classifier::new(gestdoc_retrieval::ClassifierRules::italian()?, settings.boosts);
    let ctx = classifier.classify(&text);
    println!("{}", ctx.category);
    println!("{}", serde_json::to_string_pretty(&ctx.features)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> { items.iter().map(|s| (*s).to_string()).collect() }

    #[test]
    fn query_flags_and_text_are_separated() {
        let args = parse_args(&strings(&["errore", "E001", "--module", "fatturazione", "--top-k", "5", "--json"])).expect("args");
        assert_eq!(args.positional, vec!["errore", "E001"]);
        assert_eq!(args.module.as_deref(), Some("fatturazione"));
        assert_eq!(args.top_k, Some(5));
        assert!(args.json);
    }

    #[test]
    fn bad_flags_are_errors() {
        assert!(parse_args(&strings(&["--limit"])).is_err());
        assert!(parse_args(&strings(&["--limit", "many"])).is_err());
        assert!(parse_args(&strings(&["--frobnicate"])).is_err());
    }
}
