//! Post-meeting feedback.
//!
//! After leaving, the user may rate the meeting. Submission is best-effort:
//! a failing sink is logged and never holds up the exit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{MeetingError, MeetingResult};

/// Star rating, 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = MeetingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(MeetingError::InvalidInput(format!(
                "rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(rating: Rating, comment: Option<String>) -> Self {
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Self { rating, comment }
    }
}

/// Body posted to the feedback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub meeting_title: String,
    pub rating: u8,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackSubmission {
    pub fn new(meeting_title: &str, feedback: &Feedback) -> Self {
        Self {
            meeting_title: meeting_title.to_string(),
            rating: feedback.rating.value(),
            feedback: feedback.comment.clone().unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for submitted feedback.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn submit(&self, submission: &FeedbackSubmission) -> MeetingResult<()>;
}

/// Posts feedback as JSON to an HTTP endpoint.
pub struct HttpFeedbackSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFeedbackSink {
    pub fn new(endpoint: &str, timeout: Duration) -> MeetingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeetingError::FeedbackSubmit(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl FeedbackSink for HttpFeedbackSink {
    async fn submit(&self, submission: &FeedbackSubmission) -> MeetingResult<()> {
        info!(
            "Submitting feedback for '{}' ({} stars)",
            submission.meeting_title, submission.rating
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(submission)
            .send()
            .await
            .map_err(|e| MeetingError::FeedbackSubmit(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Feedback endpoint returned {}", status);
            return Err(MeetingError::FeedbackSubmit(format!(
                "feedback endpoint returned {status}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::try_from(0).is_err());
        assert_eq!(Rating::try_from(1).unwrap().value(), 1);
        assert_eq!(Rating::try_from(5).unwrap().value(), 5);
        assert!(matches!(
            Rating::try_from(6),
            Err(MeetingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rating_deserialize_validates() {
        assert!(serde_json::from_str::<Rating>("4").is_ok());
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }

    #[test]
    fn test_blank_comment_dropped() {
        let feedback = Feedback::new(Rating::try_from(3).unwrap(), Some("   ".to_string()));
        assert!(feedback.comment.is_none());
    }

    #[test]
    fn test_submission_shape() {
        let feedback = Feedback::new(
            Rating::try_from(4).unwrap(),
            Some("Great session".to_string()),
        );
        let json = serde_json::to_value(FeedbackSubmission::new("CS101", &feedback)).unwrap();
        assert_eq!(json["meetingTitle"], "CS101");
        assert_eq!(json["rating"], 4);
        assert_eq!(json["feedback"], "Great session");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_http_sink_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/feedback"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpFeedbackSink::new(
            &format!("{}/api/feedback", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let feedback = Feedback::new(Rating::try_from(5).unwrap(), None);
        sink.submit(&FeedbackSubmission::new("CS101", &feedback))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_sink_reports_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = HttpFeedbackSink::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let feedback = Feedback::new(Rating::try_from(2).unwrap(), None);
        assert!(matches!(
            sink.submit(&FeedbackSubmission::new("CS101", &feedback)).await,
            Err(MeetingError::FeedbackSubmit(_))
        ));
    }
}
