use gestdoc_core::traits::{FragmentStore, LexicalStore};
use gestdoc_core::types::{ContentCategory, Fragment, HierarchyLevel, Locator, SearchFilters, VersionRange};
use gestdoc_text::TantivyFragmentIndex;

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
    let mut error = fragment(&["Fatturazione", "Errori"], "L'errore E001 indica che la partita IVA del cliente non è valida.", "fatturazione", (Some("7.0"), None));
    error.error_code = Some("E001".into());
    let mut param = fragment(&["Contabilità", "Parametri"], "Il parametro definisce l'aliquota predefinita applicata alle fatture.", "contabilita", (Some("7.0"), Some("7.9")));
    param.param_name = Some("aliquota_iva".into());
    vec![
        error,
        param,
        fragment(&["Contabilità", "Registri IVA"], "Per stampare i registri IVA aprire il menu Stampe e scegliere Registri.", "contabilita", (None, Some("7.5"))),
        fragment(&["Magazzino", "Giacenze"], "Le giacenze di magazzino si aggiornano a ogni movimento.", "magazzino", (None, None)),
    ]
}

fn indexed() -> (TantivyFragmentIndex, Vec<Fragment>) {
    let index = TantivyFragmentIndex::in_memory().expect("index");
    let fragments = corpus();
    index.index(&fragments).expect("index fragments");
    (index, fragments)
}

#[tokio::test]
async fn stemmed_search_ranks_from_one() {
    let (index, fragments) = indexed();
    let hits = index.search("stampa registro iva", 10, &SearchFilters::default()).await.expect("search");
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, fragments[2].id, "stemming matches stampare/registri");
    for (i, h) in hits.iter().enumerate() { assert_eq!(h.rank, i + 1); }
    for w in hits.windows(2) { assert!(w[0].score >= w[1].score); }
}

#[tokio::test]
async fn exact_identifier_fields_are_searchable() {
    let (index, fragments) = indexed();
    let hits = index.search("E001", 5, &SearchFilters::default()).await.expect("search");
    assert_eq!(hits[0].id, fragments[0].id);
    let hits = index.search("aliquota_iva", 5, &SearchFilters::default()).await.expect("search");
    assert_eq!(hits[0].id, fragments[1].id);
}

#[tokio::test]
async fn module_and_version_filters_are_pushed_down() {
    let (index, fragments) = indexed();
    let module = SearchFilters { module: Some("Contabilita".into()), version: None };
    let hits = index.search("iva aliquota registri", 10, &module).await.expect("search");
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.id == fragments[1].id || h.id == fragments[2].id));

    let v78 = SearchFilters { module: Some("contabilita".into()), version: Some("7.8".into()) };
    let hits = index.search("iva aliquota registri", 10, &v78).await.expect("search");
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec![fragments[1].id.as_str()]);

    let v6 = SearchFilters { module: None, version: Some("6.0".into()) };
    let hits = index.search("errore partita iva", 10, &v6).await.expect("search");
    assert!(hits.iter().all(|h| h.id != fragments[0].id), "E001 fragment starts at 7.0");
}

#[tokio::test]
async fn fetch_keeps_request_order_and_skips_unknown() {
    let (index, fragments) = indexed();
    let ids = vec![fragments[3].id.clone(), "missing".to_string(), fragments[0].id.clone()];
    let got = index.get_by_ids(&ids).await.expect("fetch");
    assert_eq!(got.len(), 2);
    assert_eq!(got[0], fragments[3]);
    assert_eq!(got[1], fragments[0]);
}

#[test]
fn reindexing_replaces_instead_of_duplicating() {
    let (index, fragments) = indexed();
    assert_eq!(index.num_docs(), 4);
    index.index(&fragments[..2]).expect("reindex");
    assert_eq!(index.num_docs(), 4);
    let empty = index.search_hits("", 10, &SearchFilters::default()).expect("empty");
    assert!(empty.is_empty());
}

#[test]
fn on_disk_index_reopens() {
    let tmp = tempfile::TempDir::new().expect("tmp");
    let dir = tmp.path().join("tantivy");
    TantivyFragmentIndex::create(dir.clone()).expect("create").index(&corpus()).expect("index");
    let reopened = TantivyFragmentIndex::open(dir).expect("open");
    assert_eq!(reopened.num_docs(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_searches_run_off_the_async_workers() {
    let (index, fragments) = indexed();
    let queries = ["stampa registro iva", "E001", "giacenze magazzino", "aliquota_iva"];
    let tasks: Vec<_> = queries
        .iter()
        .map(|q| {
            let index = index.clone();
            let q = (*q).to_string();
            tokio::spawn(async move { index.search(&q, 3, &SearchFilters::default()).await })
        })
        .collect();
    let mut firsts = Vec::new();
    for task in tasks {
        let hits = task.await.expect("join").expect("search");
        firsts.push(hits[0].id.clone());
    }
    assert_eq!(firsts, vec![fragments[2].id.clone(), fragments[0].id.clone(), fragments[3].id.clone(), fragments[1].id.clone()]);
}

#[tokio::test]
async fn clones_share_the_reader() {
    let index = TantivyFragmentIndex::in_memory().expect("index");
    let handle = index.clone();
    let fragments = corpus();
    index.index(&fragments).expect("index fragments");
    assert_eq!(handle.num_docs(), 4);
    let got = handle.get_by_ids(&[fragments[1].id.clone()]).await.expect("fetch");
    assert_eq!(got, vec![fragments[1].clone()]);
}
