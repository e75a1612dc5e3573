use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::models::{CandidateItem, SourceKind};

use super::{join_parts, FetchError, FetchErrorKind, FetchResult, HttpClient, Source};

const PRODUCTHUNT_GRAPHQL_URL: &str = "https://api.producthunt.com/v2/api/graphql";
const PRODUCTHUNT_TOKEN_URL: &str = "https://api.producthunt.com/v2/oauth/token";

const POSTS_QUERY: &str = r#"
query GetPosts($first: Int!) {
    posts(first: $first, order: VOTES) {
        edges {
            node {
                name
                tagline
                url
                votesCount
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PostsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PostsData {
    posts: Connection,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: Post,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    name: Option<String>,
    tagline: Option<String>,
    url: Option<String>,
    #[serde(default)]
    votes_count: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Top posts from the Product Hunt GraphQL API. The client-credentials token
/// is cached until shortly before it expires.
pub struct ProductHuntSource {
    client: HttpClient,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl ProductHuntSource {
    pub fn new(client: HttpClient, client_id: String, client_secret: String) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> FetchResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(FetchError::new(
                SourceKind::ProductHunt,
                FetchErrorKind::Auth,
                "client id and secret are not configured",
            ));
        }

        let payload = json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "client_credentials",
        });
        let response: TokenResponse = self
            .client
            .post_json(SourceKind::ProductHunt, PRODUCTHUNT_TOKEN_URL, &payload, None)
            .await?;

        let value = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::new(SourceKind::ProductHunt, FetchErrorKind::Auth, "no access_token in response"))?;
        let lifetime = response.expires_in.unwrap_or(86_400).saturating_sub(60);
        tracing::info!(expires_in = lifetime, "obtained Product Hunt access token");

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(value)
    }
}

#[async_trait]
impl Source for ProductHuntSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ProductHunt
    }

    async fn fetch(&self, limit: usize) -> FetchResult<Vec<CandidateItem>> {
        let token = self.access_token().await?;
        let payload = json!({
            "query": POSTS_QUERY,
            "variables": { "first": limit },
        });
        let response: GraphQlResponse = self
            .client
            .post_json(SourceKind::ProductHunt, PRODUCTHUNT_GRAPHQL_URL, &payload, Some(&token))
            .await?;
        parse_posts(response, limit)
    }
}

fn parse_posts(response: GraphQlResponse, limit: usize) -> FetchResult<Vec<CandidateItem>> {
    if let Some(error) = response.errors.first() {
        return Err(FetchError::malformed(
            SourceKind::ProductHunt,
            format!("GraphQL error: {}", error.message),
        ));
    }
    let data = response
        .data
        .ok_or_else(|| FetchError::malformed(SourceKind::ProductHunt, "response has no data"))?;

    Ok(data
        .posts
        .edges
        .into_iter()
        .filter_map(|edge| {
            let post = edge.node;
            let name = post.name.filter(|n| !n.is_empty())?;
            let url = post.url.filter(|u| !u.is_empty())?;
            let votes = (post.votes_count > 0).then(|| format!("Votes: {}", post.votes_count));
            let body = join_parts(&[post.tagline, votes]);
            Some(CandidateItem::new(SourceKind::ProductHunt, url, name).with_body(body))
        })
        .take(limit)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_post_edges() {
        let response: GraphQlResponse = serde_json::from_str(
            r#"{"data": {"posts": {"edges": [
                {"node": {"name": "Linear", "tagline": "Issue tracking", "url": "https://www.producthunt.com/posts/linear", "votesCount": 512}},
                {"node": {"name": "", "tagline": "nameless", "url": "https://x.test", "votesCount": 1}},
                {"node": {"name": "Quiet", "tagline": null, "url": "https://www.producthunt.com/posts/quiet", "votesCount": 0}}
            ]}}}"#,
        )
        .unwrap();
        let items = parse_posts(response, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].body.as_deref(), Some("Issue tracking | Votes: 512"));
        assert!(items[1].body.is_none());
    }

    #[test]
    fn graphql_errors_are_malformed() {
        let response: GraphQlResponse =
            serde_json::from_str(r#"{"data": null, "errors": [{"message": "bad query"}]}"#).unwrap();
        let err = parse_posts(response, 10).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Malformed);
        assert!(err.message.contains("bad query"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let client = HttpClient::new(Default::default(), 5).unwrap();
        let source = ProductHuntSource::new(client, String::new(), String::new());
        let err = source.fetch(5).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Auth);
    }
}
