use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::libs::backend::records::{AuthUser, AuthorRecord, MessageRecord, PostRecord, ProfileRecord, StoryRecord};

pub const AVATAR_PLACEHOLDER_BASE: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=";

/// Deterministic generated avatar for a user without one.
pub fn placeholder_avatar(seed: &str) -> String {
    format!("{}{}", AVATAR_PLACEHOLDER_BASE, urlencoding::encode(seed))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown post kind: {0}")]
    UnknownKind(String),
    #[error("A {0} post needs a media url")]
    MissingMedia(PostKind),
}

/// The authenticated user, or any other user as seen from a post, story or chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
}

impl Identity {
    pub fn from_profile(profile: &ProfileRecord) -> Self {
        Self {
            id: profile.id.clone(),
            name: non_empty(profile.full_name.as_deref())
                .unwrap_or("User")
                .to_string(),
            avatar: non_empty(profile.avatar_url.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| placeholder_avatar(&profile.id)),
            username: profile.username.clone(),
            bio: profile.bio.clone(),
            phone: profile.phone.clone(),
        }
    }

    /// Minimal identity built from session metadata when the profile row is missing.
    pub fn fallback(user: &AuthUser) -> Self {
        let name = non_empty(user.user_metadata.full_name.as_deref())
            .map(str::to_string)
            .or_else(|| {
                user.email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .and_then(|local| non_empty(Some(local)))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "User".to_string());

        Self {
            id: user.id.clone(),
            name,
            avatar: non_empty(user.user_metadata.avatar_url.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| placeholder_avatar(&user.id)),
            username: None,
            bio: None,
            phone: None,
        }
    }

    pub(crate) fn from_author(user_id: &str, author: Option<&AuthorRecord>) -> Self {
        let name = author
            .and_then(|a| non_empty(a.full_name.as_deref()))
            .unwrap_or("User")
            .to_string();
        let avatar = author
            .and_then(|a| non_empty(a.avatar_url.as_deref()))
            .map(str::to_string)
            .unwrap_or_else(|| placeholder_avatar(user_id));

        Self {
            id: user_id.to_string(),
            name,
            avatar,
            username: author.and_then(|a| a.username.clone()),
            bio: None,
            phone: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Text,
    Code,
    Image,
    Video,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Text => "text",
            PostKind::Code => "code",
            PostKind::Image => "image",
            PostKind::Video => "video",
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PostKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(PostKind::Text),
            "code" => Ok(PostKind::Code),
            "image" => Ok(PostKind::Image),
            "video" => Ok(PostKind::Video),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

impl FromSql for PostKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ModelError| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for PostKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Kind-specific part of a post. The variant is the single source of truth for
/// which media fields exist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostBody {
    Text,
    /// The post content is the snippet.
    Code { language: Option<String> },
    Image { url: String },
    Video { url: String },
}

impl PostBody {
    pub fn from_parts(
        kind: PostKind,
        media_url: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self, ModelError> {
        let media_url = non_empty(media_url).map(str::to_string);
        match kind {
            PostKind::Text => Ok(PostBody::Text),
            PostKind::Code => Ok(PostBody::Code {
                language: non_empty(language).map(str::to_string),
            }),
            PostKind::Image => media_url
                .map(|url| PostBody::Image { url })
                .ok_or(ModelError::MissingMedia(kind)),
            PostKind::Video => media_url
                .map(|url| PostBody::Video { url })
                .ok_or(ModelError::MissingMedia(kind)),
        }
    }

    pub fn kind(&self) -> PostKind {
        match self {
            PostBody::Text => PostKind::Text,
            PostBody::Code { .. } => PostKind::Code,
            PostBody::Image { .. } => PostKind::Image,
            PostBody::Video { .. } => PostKind::Video,
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            PostBody::Image { url } | PostBody::Video { url } => Some(url),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            PostBody::Code { language } => language.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: Identity,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub title: Option<String>,
    pub body: PostBody,
    pub likes: u32,
    pub comments: u32,
    pub shares: u32,
    pub liked_by_me: bool,
}

impl Post {
    pub fn from_record(record: &PostRecord, liked_by_me: bool) -> Result<Self, ModelError> {
        let body = PostBody::from_parts(
            record.kind,
            record.media_url.as_deref(),
            record.language.as_deref(),
        )?;

        Ok(Self {
            id: record.id.clone(),
            author: Identity::from_author(&record.user_id, record.author.as_ref()),
            created_at: record.created_at,
            content: record.content.clone(),
            title: non_empty(record.title.as_deref()).map(str::to_string),
            body,
            likes: record.likes,
            comments: record.comments,
            shares: record.shares,
            liked_by_me,
        })
    }

    pub fn kind(&self) -> PostKind {
        self.body.kind()
    }

    pub fn media_url(&self) -> Option<&str> {
        self.body.media_url()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub author: Identity,
    pub media_url: String,
    pub expires_at: DateTime<Utc>,
}

impl Story {
    pub fn from_record(record: &StoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            author: Identity::from_author(&record.user_id, record.author.as_ref()),
            media_url: record.media_url.clone(),
            expires_at: record.expires_at,
        }
    }

    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn is_from_user(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            content: record.content,
            created_at: record.created_at,
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
