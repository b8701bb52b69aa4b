// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

/// Strip FTS operators and boolean keywords, drop tokens shorter than two
/// characters, and return a safe MATCH query.  Empty output means the
/// query had no usable tokens.
pub fn sanitize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| {
            let upper = t.to_uppercase();
            upper != "AND" && upper != "OR" && upper != "NOT" && upper != "NEAR"
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `cos(a, b)`; returns 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// One memory search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub id: String,
    /// Normalized so the top hit scores 1.0.
    pub relevance: f64,
}

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// BM25 over an in-memory corpus of `(id, text)` entries, normalized so
/// the best hit has relevance 1.  Entries that match no query token are
/// omitted.
pub fn search_memory(query: &str, entries: &[(String, String)]) -> Vec<MemoryHit> {
    let query_tokens = tokenize(&sanitize_query(query));
    if query_tokens.is_empty() || entries.is_empty() {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = entries.iter().map(|(_, text)| tokenize(text)).collect();
    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.len() as f64).sum::<f64>() / n;

    // Document frequency per query token.
    let mut df: HashMap<&str, f64> = HashMap::new();
    for token in &query_tokens {
        let count = docs
            .iter()
            .filter(|doc| doc.iter().any(|t| t == token))
            .count() as f64;
        df.insert(token.as_str(), count);
    }

    let mut scored: Vec<MemoryHit> = Vec::new();
    for (i, (id, _)) in entries.iter().enumerate() {
        let doc = &docs[i];
        let doc_len = doc.len() as f64;
        let mut score = 0.0;
        for token in &query_tokens {
            let tf = doc.iter().filter(|t| *t == token).count() as f64;
            if tf == 0.0 {
                continue;
            }
            let dfi = df[token.as_str()];
            let idf = ((n - dfi + 0.5) / (dfi + 0.5) + 1.0).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len.max(1.0));
            score += idf * tf * (BM25_K1 + 1.0) / denom;
        }
        if score > 0.0 {
            scored.push(MemoryHit {
                id: id.clone(),
                relevance: score,
            });
        }
    }

    scored.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if let Some(top) = scored.first().map(|h| h.relevance) {
        for h in &mut scored {
            h.relevance /= top;
        }
    }
    scored
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
