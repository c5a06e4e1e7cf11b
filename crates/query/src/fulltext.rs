//! Full-text scoring: tokenizer and BM25
//!
//! The tokenizer lowercases, splits on non-alphanumerics, and drops
//! tokens shorter than two characters. Corpus statistics are built
//! over the candidate set of the running query, not persisted.

use std::collections::HashMap;

/// Tokenize text into searchable terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(String::from)
        .collect()
}

/// Corpus-level statistics for IDF and length normalization.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    total_docs: usize,
    doc_freqs: HashMap<String, usize>,
    avg_doc_len: f64,
}

impl Corpus {
    /// Build statistics from every candidate document's text.
    pub fn build<'a>(texts: impl Iterator<Item = &'a str>) -> Self {
        let mut total_docs = 0usize;
        let mut total_len = 0usize;
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        for text in texts {
            total_docs += 1;
            let tokens = tokenize(text);
            total_len += tokens.len();
            let mut seen = std::collections::HashSet::new();
            for token in tokens {
                if seen.insert(token.clone()) {
                    *doc_freqs.entry(token).or_insert(0) += 1;
                }
            }
        }
        Corpus {
            total_docs,
            doc_freqs,
            avg_doc_len: if total_docs == 0 {
                0.0
            } else {
                total_len as f64 / total_docs as f64
            },
        }
    }

    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    /// IDF with the usual smoothing:
    /// `ln((N - df + 0.5) / (df + 0.5) + 1)`.
    pub fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        let n = self.total_docs as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// BM25 with the standard defaults (`k1 = 1.2`, `b = 0.75`).
#[derive(Debug, Clone)]
pub struct Bm25 {
    k1: f64,
    b: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Bm25 { k1: 1.2, b: 0.75 }
    }
}

impl Bm25 {
    pub fn new(k1: f64, b: f64) -> Self {
        Bm25 { k1, b }
    }

    /// Score one document against a query under the given corpus.
    pub fn score(&self, corpus: &Corpus, doc_text: &str, query: &str) -> f64 {
        let query_terms = tokenize(query);
        let doc_terms = tokenize(doc_text);
        if query_terms.is_empty() || doc_terms.is_empty() {
            return 0.0;
        }
        let doc_len = doc_terms.len() as f64;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for term in &doc_terms {
            *counts.entry(term.as_str()).or_insert(0) += 1;
        }

        let avg_len = corpus.avg_doc_len.max(1.0);
        let mut score = 0.0;
        for term in &query_terms {
            let tf = counts.get(term.as_str()).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            let idf = corpus.idf(term);
            let tf_component =
                (tf * (self.k1 + 1.0)) / (tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_len));
            score += idf * tf_component;
        }
        score
    }
}

/// Rank `(pk, text)` documents against a query; scores of zero are
/// dropped. Descending by score, ties ascending by pk.
pub fn rank<'a>(
    bm25: &Bm25,
    corpus: &Corpus,
    docs: impl Iterator<Item = (&'a str, &'a str)>,
    query: &str,
) -> Vec<(String, f64)> {
    let mut hits: Vec<(String, f64)> = docs
        .map(|(pk, text)| (pk.to_string(), bm25.score(corpus, text, query)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    hits.sort_by(|a, b| {
        b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
    });
    hits
}
