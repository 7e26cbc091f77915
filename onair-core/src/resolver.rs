//! Remote content resolution for auto mode
//!
//! A resolver turns a topic (the current hashtag) into a directly playable
//! stream URL and a title. The orchestrator only ever calls it with nothing on
//! air and wraps every call in its own timeout.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing as log;

use crate::config::ResolverConfig;
use crate::error::{Error, Result};
use crate::process::{run_captured, stderr_excerpt};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TITLE: &str = "YouTube Video";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContent {
    pub stream_url: String,
    pub title: String,
}

#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, topic: &str) -> Result<ResolvedContent>;
}

/// One entry of a flat search listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct SearchEntry {
    url: Option<String>,
    id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    page_url: String,
    title: String,
}

impl SearchEntry {
    fn into_candidate(self) -> Option<Candidate> {
        let page_url = match (self.url, self.id) {
            (Some(url), _) if !url.is_empty() => url,
            (_, Some(id)) if !id.is_empty() => format!("https://www.youtube.com/watch?v={id}"),
            _ => return None,
        };
        Some(Candidate {
            page_url,
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        })
    }
}

/// Parse `--dump-json` output: one JSON object per line, bad lines skipped
fn parse_search_output(stdout: &str) -> Vec<SearchEntry> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn pick_candidate(entries: Vec<SearchEntry>) -> Option<Candidate> {
    let entry = entries.choose(&mut rand::thread_rng())?.clone();
    entry.into_candidate()
}

/// Search term for a hashtag: `#` characters are dropped
fn search_term(topic: &str) -> String {
    topic.replace('#', "").trim().to_string()
}

/// Resolver backed by the `yt-dlp` command line tool
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    config: ResolverConfig,
}

impl YtDlpResolver {
    #[must_use]
    pub const fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchEntry>> {
        let count = self.config.search_results.max(1);
        let args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".to_string(),
            "--playlist-end".to_string(),
            count.to_string(),
            format!("ytsearch{count}:{term}"),
        ];

        let output = run_captured(&self.config.ytdlp_path, &args, COMMAND_TIMEOUT).await?;
        if !output.status.success() {
            return Err(Error::Resolve(format!(
                "search failed ({}): {}",
                output.status,
                stderr_excerpt(&output)
            )));
        }
        Ok(parse_search_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn stream_url(&self, page_url: &str) -> Result<String> {
        let args = vec![
            "-f".to_string(),
            self.config.format.clone(),
            "-g".to_string(),
            page_url.to_string(),
        ];

        let output = run_captured(&self.config.ytdlp_path, &args, COMMAND_TIMEOUT).await?;
        if !output.status.success() {
            return Err(Error::Resolve(format!(
                "stream lookup failed ({}): {}",
                output.status,
                stderr_excerpt(&output)
            )));
        }

        // With a combined format there is exactly one URL; keep the first anyway
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Resolve("no stream URL returned".to_string()))
    }
}

#[async_trait]
impl ContentResolver for YtDlpResolver {
    async fn resolve(&self, topic: &str) -> Result<ResolvedContent> {
        let term = search_term(topic);
        if term.is_empty() {
            return Err(Error::Resolve("empty topic".to_string()));
        }

        log::info!("Searching for: {}", term);
        let entries = self.search(&term).await?;
        log::debug!("Search returned {} results", entries.len());

        let candidate = pick_candidate(entries)
            .ok_or_else(|| Error::Resolve(format!("no usable results for {term}")))?;

        log::info!("Resolving stream for: {}", candidate.title);
        let stream_url = self.stream_url(&candidate.page_url).await?;

        Ok(ResolvedContent {
            stream_url,
            title: candidate.title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_term_strips_hashes() {
        assert_eq!(search_term("#funny"), "funny");
        assert_eq!(search_term("##"), "");
    }

    #[test]
    fn test_parse_search_output_skips_bad_lines() {
        let stdout = r#"{"url": "https://www.youtube.com/watch?v=a", "title": "A"}
not json
{"id": "b"}

{"title": "no link"}
"#;
        let entries = parse_search_output(stdout);
        assert_eq!(entries.len(), 3);

        let candidates: Vec<_> = entries.into_iter().filter_map(SearchEntry::into_candidate).collect();
        assert_eq!(
            candidates,
            vec![
                Candidate {
                    page_url: "https://www.youtube.com/watch?v=a".into(),
                    title: "A".into(),
                },
                Candidate {
                    page_url: "https://www.youtube.com/watch?v=b".into(),
                    title: DEFAULT_TITLE.into(),
                },
            ]
        );
    }

    #[test]
    fn test_pick_from_empty_is_none() {
        assert!(pick_candidate(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error() {
        let resolver = YtDlpResolver::new(ResolverConfig {
            ytdlp_path: "definitely-not-installed-ytdlp".into(),
            ..ResolverConfig::default()
        });
        assert!(resolver.resolve("#funny").await.is_err());
        assert!(matches!(resolver.resolve("#").await, Err(Error::Resolve(_))));
    }
}
