use crate::error::{BotError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const ROWS_ENDPOINT: &str = "https://datasets-server.huggingface.co/rows";
const ROWS_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(rename = "quote")]
    pub text: String,
    pub author: String,
}

/// Read-only quote corpus, sampled by index.
#[derive(Debug, Clone)]
pub struct QuoteSource {
    quotes: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    num_rows_total: usize,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: Quote,
}

impl QuoteSource {
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self { quotes }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let quotes: Vec<Quote> = serde_json::from_str(&data)?;
        info!("Loaded {} quotes from {}", quotes.len(), path.display());
        Ok(Self { quotes })
    }

    /// Loads the cached corpus, downloading the `train` split of `dataset`
    /// first when `path` does not exist yet.
    pub async fn load_or_fetch(path: &Path, dataset: &str) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("Corpus {} not found, fetching dataset {}", path.display(), dataset);
            let client = reqwest::Client::new();
            let quotes = fetch_dataset(&client, dataset).await?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&quotes)?)?;
            info!("Cached {} quotes to {}", quotes.len(), path.display());
        }
        Self::load(path)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Picks `count` distinct corpus indices.
    pub fn sample_indices<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Result<Vec<usize>> {
        if count > self.quotes.len() {
            return Err(BotError::InsufficientCorpus {
                requested: count,
                available: self.quotes.len(),
            });
        }
        Ok(rand::seq::index::sample(rng, self.quotes.len(), count).into_vec())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Result<Vec<Quote>> {
        let indices = self.sample_indices(rng, count)?;
        debug!("Sampled quote indices {:?}", indices);
        Ok(indices.into_iter().map(|i| self.quotes[i].clone()).collect())
    }
}

async fn fetch_dataset(client: &reqwest::Client, dataset: &str) -> anyhow::Result<Vec<Quote>> {
    let mut quotes = Vec::new();
    let mut offset = 0;
    loop {
        let page: RowsPage = client
            .get(ROWS_ENDPOINT)
            .query(&[
                ("dataset", dataset.to_string()),
                ("config", "default".to_string()),
                ("split", "train".to_string()),
                ("offset", offset.to_string()),
                ("length", ROWS_PAGE.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let fetched = page.rows.len();
        quotes.extend(page.rows.into_iter().map(|r| r.row));
        offset += fetched;
        debug!("Fetched {}/{} corpus rows", offset, page.num_rows_total);
        if fetched == 0 || offset >= page.num_rows_total {
            break;
        }
    }
    if quotes.is_empty() {
        anyhow::bail!("dataset {} returned no rows", dataset);
    }
    Ok(quotes)
}
