use crate::record::RecordKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A normalized record produced by one of the page parsers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Video(Video),
    Channel(Channel),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Video(_) => RecordKind::Video,
            Self::Channel(_) => RecordKind::Channel,
        }
    }

    /// The platform ID the record describes
    pub fn id(&self) -> &str {
        match self {
            Self::Video(v) => &v.id,
            Self::Channel(c) => &c.id,
        }
    }
}

/// Video metadata extracted from a watch page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Video {
    pub id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,

    /// Channel display name
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub uploader_url: Option<String>,

    pub upload_date: Option<NaiveDate>,
    pub duration_secs: Option<u64>,
    pub views: Option<u64>,
    pub likes: Option<u64>,
    pub dislikes: Option<u64>,
    pub genre: Option<String>,
    pub tags: Vec<String>,
    pub thumbnail: Option<String>,
    pub license: Option<String>,
    pub family_friendly: Option<bool>,

    /// Stream format IDs listed by the player config
    pub formats: Vec<String>,

    /// IDs of recommended videos
    pub related: Vec<String>,
}

impl Video {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A channel's video listing gathered from the JSON API or browse continuation pages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub video_urls: Vec<String>,
}

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video_urls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_json_is_tagged() {
        let mut video = Video::new("abc");
        video.title = Some("A title".to_string());
        video.upload_date = NaiveDate::from_ymd_opt(2018, 3, 1);

        let json = serde_json::to_value(Record::Video(video)).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["id"], "abc");
        assert_eq!(json["upload_date"], "2018-03-01");
    }

    #[test]
    fn test_sparse_channel_deserializes() {
        let record: Record = serde_json::from_str(r#"{"type":"channel","id":"UC1"}"#).unwrap();
        assert_eq!(record.kind(), RecordKind::Channel);
        assert_eq!(record.id(), "UC1");
    }
}
