use crate::enrich::GenerateError;
use crate::gemini::GeminiClient;
use crate::http::build_client;
use crate::supabase::{SinkError, VideoSink};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

const QUERY_SYSTEM_PROMPT: &str = "Based on a given prediction market question, determine \
relevant twitter advanced searches to perform to get relevant news on the market. Example \
Question: How many gold cards will trump sell this year? Example Answer: [\"trump gold card\", \
\"gold cards\", \"trump card\"]. Strongly prefer shorter, minimal queries. Do not include words \
like update, latest news, status, end date, etc. Return the TOP FOUR queries. The last two \
queries should be broader and less specific. Return your answer as a JSON array of strings.";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    Request(String),
}

/// Turns a market question into a handful of advanced-search queries,
/// ordered most-specific first.
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan_queries(&self, question: &str) -> Result<Vec<String>, GenerateError>;
}

#[async_trait]
impl QueryPlanner for GeminiClient {
    async fn plan_queries(&self, question: &str) -> Result<Vec<String>, GenerateError> {
        let text = self.complete_text(QUERY_SYSTEM_PROMPT, question).await?;
        Ok(parse_query_array(&text))
    }
}

#[async_trait]
pub trait TwitterSearch: Send + Sync {
    /// Best video URL among the top results for one query, if any.
    async fn find_video(&self, query: &str) -> Result<Option<String>, SearchError>;
}

#[derive(Debug, Clone)]
pub struct TwitterClient {
    http: Client,
    api_key: String,
    search_url: String,
}

impl TwitterClient {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("TWITTER_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        Some(Self {
            http: build_client(),
            api_key,
            search_url: std::env::var("TWITTER_SEARCH_URL").unwrap_or_else(|_| {
                "https://api.twitterapi.io/twitter/tweet/advanced_search".into()
            }),
        })
    }
}

#[async_trait]
impl TwitterSearch for TwitterClient {
    async fn find_video(&self, query: &str) -> Result<Option<String>, SearchError> {
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("query", query), ("queryType", "Top")])
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;
        Ok(first_video_url(&body))
    }
}

/// Backfill pass over persisted questions that have no video yet: plan
/// search queries for each, take the first query that yields a video, and
/// patch the row. Per-question failures are contained; the return value is
/// the number of rows linked.
pub async fn backfill_videos(
    sink: &dyn VideoSink,
    planner: &dyn QueryPlanner,
    search: &dyn TwitterSearch,
) -> Result<usize, SinkError> {
    let questions = sink.unlinked_questions().await?;
    info!(
        target = "gamma.video",
        count = questions.len(),
        "backfilling video links"
    );
    let mut linked = 0usize;
    for question in &questions {
        let queries = match planner.plan_queries(&question.question).await {
            Ok(queries) => queries,
            Err(err) => {
                warn!(
                    target = "gamma.video",
                    market_id = %question.marketid,
                    error = %err,
                    "query planning failed"
                );
                continue;
            }
        };
        for query in &queries {
            let video_url = match search.find_video(query).await {
                Ok(Some(url)) => url,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        target = "gamma.video",
                        query = %query,
                        error = %err,
                        "twitter search failed"
                    );
                    continue;
                }
            };
            match sink.set_video_url(&question.marketid, &video_url).await {
                Ok(()) => linked += 1,
                Err(err) => warn!(
                    target = "gamma.video",
                    market_id = %question.marketid,
                    error = %err,
                    "video link update failed"
                ),
            }
            break;
        }
    }
    Ok(linked)
}

// The search API answers in three shapes depending on result cardinality:
// a wrapper object, a single tweet object, or a bare array.

#[derive(Debug, Deserialize)]
struct TweetList {
    #[serde(default)]
    tweets: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    #[serde(rename = "extendedEntities")]
    extended_entities: Option<ExtendedEntities>,
}

#[derive(Debug, Deserialize)]
struct ExtendedEntities {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "video_info")]
    video_info: Option<VideoInfo>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    url: String,
}

fn first_video_url(body: &str) -> Option<String> {
    if let Ok(list) = serde_json::from_str::<TweetList>(body)
        && let Some(url) = list.tweets.iter().find_map(best_variant)
    {
        return Some(url);
    }
    if let Ok(single) = serde_json::from_str::<Tweet>(body)
        && let Some(url) = best_variant(&single)
    {
        return Some(url);
    }
    if let Ok(tweets) = serde_json::from_str::<Vec<Tweet>>(body)
        && let Some(url) = tweets.iter().find_map(best_variant)
    {
        return Some(url);
    }
    None
}

/// Prefer an MP4 variant, fall back to any variant with a URL.
fn best_variant(tweet: &Tweet) -> Option<String> {
    let entities = tweet.extended_entities.as_ref()?;
    let variants: Vec<&Variant> = entities
        .media
        .iter()
        .filter_map(|media| media.video_info.as_ref())
        .flat_map(|info| info.variants.iter())
        .filter(|variant| !variant.url.is_empty())
        .collect();
    variants
        .iter()
        .find(|variant| variant.content_type == "video/mp4")
        .or_else(|| variants.first())
        .map(|variant| variant.url.clone())
}

fn parse_query_array(text: &str) -> Vec<String> {
    let mut text = strip_markdown_fence(text);
    if let Ok(queries) = serde_json::from_str::<Vec<String>>(&text) {
        return queries;
    }
    // Sometimes the array arrives wrapped in a JSON string.
    if let Ok(inner) = serde_json::from_str::<String>(&text) {
        text = inner;
    }
    // Or surrounded by prose; salvage the bracketed section.
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']'))
        && end > start
    {
        text = text[start..=end].to_string();
    }
    let text = text.trim_matches(|ch: char| ch == '`' || ch.is_whitespace());
    match serde_json::from_str::<Vec<String>>(text) {
        Ok(queries) => queries,
        Err(_) => {
            warn!(
                target = "gamma.video",
                "query response was not a JSON string array"
            );
            Vec::new()
        }
    }
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionRef;
    use std::sync::Mutex;

    #[test]
    fn parses_plain_query_array() {
        assert_eq!(
            parse_query_array(r#"["trump gold card", "gold cards"]"#),
            vec!["trump gold card", "gold cards"]
        );
    }

    #[test]
    fn parses_fenced_query_array() {
        let text = "```json\n[\"shutdown end\", \"government shutdown\"]\n```";
        assert_eq!(
            parse_query_array(text),
            vec!["shutdown end", "government shutdown"]
        );
    }

    #[test]
    fn salvages_array_from_surrounding_prose() {
        let text = "Here are the queries: [\"fed rate cut\", \"fomc\"] — good luck!";
        assert_eq!(parse_query_array(text), vec!["fed rate cut", "fomc"]);
    }

    #[test]
    fn unwraps_string_wrapped_array() {
        let text = r#""[\"btc etf\", \"bitcoin\"]""#;
        assert_eq!(parse_query_array(text), vec!["btc etf", "bitcoin"]);
    }

    #[test]
    fn garbage_yields_no_queries() {
        assert!(parse_query_array("I cannot help with that.").is_empty());
    }

    #[test]
    fn prefers_mp4_variant_in_wrapper_payload() {
        let body = r#"{
            "tweets": [{
                "id": "1",
                "extendedEntities": {"media": [{
                    "type": "video",
                    "video_info": {"variants": [
                        {"content_type": "application/x-mpegURL", "url": "https://v.test/playlist.m3u8"},
                        {"bitrate": 832000, "content_type": "video/mp4", "url": "https://v.test/clip.mp4"}
                    ]}
                }]}
            }]
        }"#;
        assert_eq!(
            first_video_url(body).as_deref(),
            Some("https://v.test/clip.mp4")
        );
    }

    #[test]
    fn falls_back_to_any_variant_without_mp4() {
        let body = r#"{
            "tweets": [{
                "extendedEntities": {"media": [{
                    "video_info": {"variants": [
                        {"content_type": "application/x-mpegURL", "url": "https://v.test/playlist.m3u8"}
                    ]}
                }]}
            }]
        }"#;
        assert_eq!(
            first_video_url(body).as_deref(),
            Some("https://v.test/playlist.m3u8")
        );
    }

    #[test]
    fn handles_bare_array_payload() {
        let body = r#"[{
            "extendedEntities": {"media": [{
                "video_info": {"variants": [
                    {"content_type": "video/mp4", "url": "https://v.test/a.mp4"}
                ]}
            }]}
        }]"#;
        assert_eq!(first_video_url(body).as_deref(), Some("https://v.test/a.mp4"));
    }

    #[test]
    fn payload_without_media_yields_none() {
        assert!(first_video_url(r#"{"tweets": [{"id": "1"}]}"#).is_none());
        assert!(first_video_url("not json").is_none());
    }

    #[derive(Default)]
    struct MemoryVideoSink {
        rows: Vec<QuestionRef>,
        updates: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VideoSink for MemoryVideoSink {
        async fn unlinked_questions(&self) -> Result<Vec<QuestionRef>, SinkError> {
            Ok(self.rows.clone())
        }

        async fn set_video_url(&self, marketid: &str, url: &str) -> Result<(), SinkError> {
            self.updates
                .lock()
                .unwrap()
                .push((marketid.to_string(), url.to_string()));
            Ok(())
        }
    }

    struct FixedPlanner(Vec<String>);

    #[async_trait]
    impl QueryPlanner for FixedPlanner {
        async fn plan_queries(&self, _question: &str) -> Result<Vec<String>, GenerateError> {
            Ok(self.0.clone())
        }
    }

    /// Yields a video only for one specific query, counting every search.
    struct SelectiveSearch {
        hit: String,
        searches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TwitterSearch for SelectiveSearch {
        async fn find_video(&self, query: &str) -> Result<Option<String>, SearchError> {
            self.searches.lock().unwrap().push(query.to_string());
            if query == self.hit {
                Ok(Some("https://v.test/found.mp4".into()))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn links_first_query_that_yields_a_video() {
        let sink = MemoryVideoSink {
            rows: vec![QuestionRef {
                marketid: "7".into(),
                question: "Will the shutdown end this week?".into(),
            }],
            ..Default::default()
        };
        let planner = FixedPlanner(vec!["shutdown end".into(), "shutdown".into()]);
        let search = SelectiveSearch {
            hit: "shutdown end".into(),
            searches: Mutex::new(Vec::new()),
        };
        let linked = backfill_videos(&sink, &planner, &search)
            .await
            .expect("backfill completes");
        assert_eq!(linked, 1);
        assert_eq!(
            sink.updates.lock().unwrap().as_slice(),
            [("7".to_string(), "https://v.test/found.mp4".to_string())]
        );
        // stops searching once a video is linked
        assert_eq!(search.searches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausts_queries_without_linking() {
        let sink = MemoryVideoSink {
            rows: vec![QuestionRef {
                marketid: "7".into(),
                question: "Will it rain?".into(),
            }],
            ..Default::default()
        };
        let planner = FixedPlanner(vec!["rain".into(), "weather".into()]);
        let search = SelectiveSearch {
            hit: "nothing matches".into(),
            searches: Mutex::new(Vec::new()),
        };
        let linked = backfill_videos(&sink, &planner, &search)
            .await
            .expect("backfill completes");
        assert_eq!(linked, 0);
        assert!(sink.updates.lock().unwrap().is_empty());
        assert_eq!(search.searches.lock().unwrap().len(), 2);
    }
}
