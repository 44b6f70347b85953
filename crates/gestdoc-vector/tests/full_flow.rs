use gestdoc_core::traits::{DenseStore, Embedder, FragmentStore};
use gestdoc_core::types::{ContentCategory, Fragment, HierarchyLevel, Locator, SearchFilters, VersionRange};
use gestdoc_embed::FakeEmbedder;
use gestdoc_vector::{LanceFragmentIndexer, LanceFragmentStore};
use tempfile::TempDir;

const TABLE: &str = "fragments_test";

fn fragment(path: &[&str], text: &str, module: &str, version: (Option<&str>, Option<&str>)) -> Fragment {
    Fragment {
        id: String::new(),
        title: String::new(),
        text: text.to_string(),
        path: path.iter().map(|s| (*s).to_string()).collect(),
        level: HierarchyLevel::Child,
        category: ContentCategory::Procedure,
        version: VersionRange { min: version.0.map(Into::into), max: version.1.map(Into::into) },
        module: module.to_string(),
        locator: Locator { source_url: format!("https://docs.example.it/{module}"), anchor: None, page_range: None },
        content_hash: 0,
        parent_id: None,
        summary: None,
        param_name: None,
        error_code: None,
    }
    .with_derived_fields()
}

fn corpus() -> Vec<Fragment> {
    vec![
        fragment(&["Fatturazione", "Errori"], "errore partita iva cliente non valida", "Fatturazione", (Some("7.0"), None)),
        fragment(&["Contabilità", "Parametri"], "aliquota predefinita fatture", "Contabilita", (Some("7.0"), Some("7.9"))),
        fragment(&["Contabilità", "Registri IVA"], "stampa registri iva menu stampe", "Contabilita", (None, Some("7.5"))),
        fragment(&["Magazzino", "Giacenze"], "giacenze magazzino movimento", "Magazzino", (None, None)),
    ]
}

async fn indexed(tmp: &TempDir) -> (LanceFragmentStore, Vec<Fragment>, FakeEmbedder) {
    let embedder = FakeEmbedder::new(256);
    let fragments = corpus();
    let texts: Vec<String> = fragments.iter().map(Fragment::embedding_text).collect();
    let embeddings = embedder.embed_batch(&texts).expect("embed");
    let indexer = LanceFragmentIndexer::new(tmp.path(), TABLE).await.expect("indexer");
    assert_eq!(indexer.index(&fragments, &embeddings).await.expect("index"), 4);
    let store = LanceFragmentStore::open(tmp.path(), TABLE).await.expect("store");
    (store, fragments, embedder)
}

#[tokio::test]
async fn dense_search_ranks_nearest_first() {
    let tmp = TempDir::new().expect("tmp");
    let (store, fragments, embedder) = indexed(&tmp).await;
    let q = embedder.embed_text("stampa registri iva");
    let hits = store.search(&q, 3, &SearchFilters::default()).await.expect("search");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, fragments[2].id);
    for (i, h) in hits.iter().enumerate() { assert_eq!(h.rank, i + 1); }
    for w in hits.windows(2) { assert!(w[0].score >= w[1].score); }
}

#[tokio::test]
async fn filters_restrict_dense_results() {
    let tmp = TempDir::new().expect("tmp");
    let (store, fragments, embedder) = indexed(&tmp).await;
    let q = embedder.embed_text("iva");
    let filters = SearchFilters { module: Some("CONTABILITA".into()), version: Some("7.8".into()) };
    let hits = store.search(&q, 10, &filters).await.expect("search");
    assert_eq!(hits.iter().map(|h| h.id.clone()).collect::<Vec<_>>(), vec![fragments[1].id.clone()]);
}

#[tokio::test]
async fn reindex_replaces_rows_and_fetch_keeps_request_order() {
    let tmp = TempDir::new().expect("tmp");
    let (store, fragments, embedder) = indexed(&tmp).await;
    let texts: Vec<String> = fragments.iter().map(Fragment::embedding_text).collect();
    let indexer = LanceFragmentIndexer::new(tmp.path(), TABLE).await.expect("indexer");
    indexer.index(&fragments, &embedder.embed_batch(&texts).expect("embed")).await.expect("reindex");
    assert_eq!(store.count().await.expect("count"), 4);

    let ids = vec![fragments[3].id.clone(), "frag-missing".to_string(), fragments[0].id.clone()];
    let got = store.get_by_ids(&ids).await.expect("fetch");
    assert_eq!(got, vec![fragments[3].clone(), fragments[0].clone()]);
}

#[tokio::test]
async fn missing_table_is_an_error() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceFragmentStore::open(tmp.path(), "absent").await.expect("open");
    assert!(store.search(&[0.0; 4], 5, &SearchFilters::default()).await.is_err());
}
