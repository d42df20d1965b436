//! Message categories, stored on events as a bit set for filtered lookups

use serde_json::Value;

pub mod event_type {
    pub const ASSET_ADD: &str = "conversation.asset-add";
    pub const ASSET_META: &str = "conversation.asset-meta";
    pub const DELETE_EVERYWHERE: &str = "conversation.delete-everywhere";
    pub const KNOCK: &str = "conversation.knock";
    pub const LOCATION: &str = "conversation.location";
    pub const MESSAGE_ADD: &str = "conversation.message-add";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCategory(u32);

impl MessageCategory {
    pub const NONE: Self = Self(0);
    pub const UNDEFINED: Self = Self(1 << 0);
    pub const EXCLUDED: Self = Self(1 << 1);
    pub const KNOCK: Self = Self(1 << 3);
    pub const TEXT: Self = Self(1 << 4);
    pub const LINK: Self = Self(1 << 5);
    pub const LINK_PREVIEW: Self = Self(1 << 6);
    pub const IMAGE: Self = Self(1 << 7);
    pub const GIF: Self = Self(1 << 8);
    pub const FILE: Self = Self(1 << 9);
    pub const VIDEO: Self = Self(1 << 10);
    pub const LIKED: Self = Self(1 << 11);
    pub const AUDIO: Self = Self(1 << 12);
    pub const LOCATION: Self = Self(1 << 13);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MessageCategory {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MessageCategory {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Derive the category of a stored conversation event
pub fn category_from_event(event: &Value) -> MessageCategory {
    if event.get("ephemeral_expires").is_some_and(|v| !v.is_null()) {
        return MessageCategory::EXCLUDED;
    }

    let data = event.get("data");
    let mut category = match event.get("type").and_then(Value::as_str) {
        Some(event_type::MESSAGE_ADD) => text_category(data),
        Some(event_type::ASSET_ADD) => asset_category(data),
        Some(event_type::KNOCK) => MessageCategory::KNOCK,
        Some(event_type::LOCATION) => MessageCategory::LOCATION,
        _ => MessageCategory::UNDEFINED,
    };

    let liked = event
        .get("reactions")
        .and_then(Value::as_object)
        .is_some_and(|reactions| !reactions.is_empty());
    if liked {
        category |= MessageCategory::LIKED;
    }

    category
}

fn text_category(data: Option<&Value>) -> MessageCategory {
    let mut category = MessageCategory::TEXT;

    let content = data
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if content.contains("http://") || content.contains("https://") || content.contains("www.") {
        category |= MessageCategory::LINK;
    }

    let has_previews = data
        .and_then(|d| d.get("previews"))
        .and_then(Value::as_array)
        .is_some_and(|previews| !previews.is_empty());
    if has_previews {
        category |= MessageCategory::LINK_PREVIEW;
    }

    category
}

fn asset_category(data: Option<&Value>) -> MessageCategory {
    let content_type = data
        .and_then(|d| d.get("content_type"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if content_type == "image/gif" {
        MessageCategory::GIF
    } else if content_type.starts_with("image/") {
        MessageCategory::IMAGE
    } else if content_type.starts_with("video/") {
        MessageCategory::VIDEO
    } else if content_type.starts_with("audio/") {
        MessageCategory::AUDIO
    } else {
        MessageCategory::FILE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_with_link_and_reaction() {
        let event = json!({
            "type": "conversation.message-add",
            "data": {"content": "see https://example.com"},
            "reactions": {"user-1": "❤️"},
        });
        let category = category_from_event(&event);
        assert!(category.contains(MessageCategory::TEXT));
        assert!(category.contains(MessageCategory::LINK));
        assert!(category.contains(MessageCategory::LIKED));
        assert!(!category.contains(MessageCategory::LINK_PREVIEW));
    }

    #[test]
    fn test_asset_categories() {
        let asset = |content_type: &str| {
            json!({"type": "conversation.asset-add", "data": {"content_type": content_type}})
        };
        assert_eq!(category_from_event(&asset("image/gif")), MessageCategory::GIF);
        assert_eq!(category_from_event(&asset("image/png")), MessageCategory::IMAGE);
        assert_eq!(category_from_event(&asset("video/mp4")), MessageCategory::VIDEO);
        assert_eq!(category_from_event(&asset("audio/ogg")), MessageCategory::AUDIO);
        assert_eq!(category_from_event(&asset("application/pdf")), MessageCategory::FILE);
    }

    #[test]
    fn test_ephemeral_and_unknown() {
        let ephemeral = json!({"type": "conversation.message-add", "ephemeral_expires": 5000});
        assert_eq!(category_from_event(&ephemeral), MessageCategory::EXCLUDED);

        let member_join = json!({"type": "conversation.member-join"});
        assert_eq!(category_from_event(&member_join), MessageCategory::UNDEFINED);
        assert_eq!(MessageCategory::UNDEFINED.bits(), 1);
    }
}
