use std::path::Path;

use gestdoc_embed::{get_default_embedder, get_default_reranker};

#[test]
fn fake_embedder_shapes_and_determinism() {
    // Force fake embedder to avoid loading large model
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");

    let embedder = get_default_embedder(None).expect("embedder");
    let texts = vec!["stampa registri iva".to_string(), "stampa registri iva".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 1024, "embedding dim is 1024");
    assert_eq!(embedder.dim(), 1024);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn fake_reranker_scores_every_text() {
    std::env::set_var("APP_USE_FAKE_RERANKER", "1");
    let reranker = get_default_reranker(None).expect("reranker");
    let texts = vec!["Errore E001: licenza scaduta".to_string(), "Stampa registri".to_string(), String::new()];
    let scores = reranker.score("errore E001 licenza", &texts).expect("score");
    assert_eq!(scores.len(), 3);
    assert!(scores[0] > scores[1]);
}

#[test]
fn missing_configured_model_dir_is_an_error() {
    let err = gestdoc_embed::CrossEncoderReranker::load(Path::new("/nonexistent/bge-reranker")).err().expect("load must fail");
    assert!(!err.to_string().is_empty());
}
