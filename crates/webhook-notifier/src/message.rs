//! Robot message types and their builders
//!
//! Builders only accumulate data; nothing touches the network until the
//! finished [`Message`] is handed to a client. Every builder converts into
//! `Message` via `From`, so `client.send(Message::text("hi").at_all(), ..)`
//! works without an explicit `build()`.

use serde::{Deserialize, Serialize};

/// Recipients highlighted in Text and Markdown messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtTarget {
    #[serde(rename = "atMobiles", default, skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,

    #[serde(rename = "atUserIds", default, skip_serializing_if = "Vec::is_empty")]
    pub at_user_ids: Vec<String>,

    #[serde(rename = "isAtAll", default, skip_serializing_if = "is_false")]
    pub is_at_all: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkContent {
    pub title: String,
    pub text: String,
    #[serde(rename = "messageUrl")]
    pub message_url: String,
    #[serde(rename = "picUrl", default, skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownContent {
    pub title: String,
    pub text: String,
}

/// Button layout of an action card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonOrientation {
    #[default]
    #[serde(rename = "0")]
    Vertical,
    #[serde(rename = "1")]
    Horizontal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub title: String,
    #[serde(rename = "actionURL")]
    pub action_url: String,
}

/// Action card body
///
/// Either `single_title`/`single_url` are set (whole card is one link) or
/// `btns` holds the explicit button list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCardContent {
    pub title: String,
    pub text: String,
    #[serde(rename = "btnOrientation")]
    pub btn_orientation: ButtonOrientation,
    #[serde(rename = "singleTitle", default, skip_serializing_if = "Option::is_none")]
    pub single_title: Option<String>,
    #[serde(rename = "singleURL", default, skip_serializing_if = "Option::is_none")]
    pub single_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub btns: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLink {
    pub title: String,
    #[serde(rename = "messageURL")]
    pub message_url: String,
    #[serde(rename = "picURL")]
    pub pic_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCardContent {
    pub links: Vec<FeedLink>,
}

/// A robot message in its wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msgtype")]
pub enum Message {
    #[serde(rename = "text")]
    Text { text: TextContent, at: AtTarget },

    #[serde(rename = "link")]
    Link { link: LinkContent },

    #[serde(rename = "markdown")]
    Markdown {
        markdown: MarkdownContent,
        at: AtTarget,
    },

    #[serde(rename = "actionCard")]
    ActionCard {
        #[serde(rename = "actionCard")]
        action_card: ActionCardContent,
    },

    #[serde(rename = "feedCard")]
    FeedCard {
        #[serde(rename = "feedCard")]
        feed_card: FeedCardContent,
    },
}

impl Message {
    /// Plain text message.
    pub fn text(content: impl Into<String>) -> TextBuilder {
        TextBuilder {
            content: content.into(),
            at: AtTarget::default(),
        }
    }

    /// Link preview message.
    pub fn link(
        title: impl Into<String>,
        text: impl Into<String>,
        message_url: impl Into<String>,
    ) -> LinkBuilder {
        LinkBuilder {
            title: title.into(),
            text: text.into(),
            message_url: message_url.into(),
            pic_url: None,
        }
    }

    /// Markdown message. Supports headings, quotes, bold, links, images and lists.
    pub fn markdown(title: impl Into<String>, text: impl Into<String>) -> MarkdownBuilder {
        MarkdownBuilder {
            title: title.into(),
            text: text.into(),
            at: AtTarget::default(),
        }
    }

    /// Action card with either a single link or a button list.
    pub fn action_card(title: impl Into<String>, text: impl Into<String>) -> ActionCardBuilder {
        ActionCardBuilder {
            title: title.into(),
            text: text.into(),
            orientation: ButtonOrientation::Vertical,
            single: None,
            buttons: Vec::new(),
        }
    }

    /// Feed card listing several links.
    pub fn feed_card() -> FeedCardBuilder {
        FeedCardBuilder { links: Vec::new() }
    }

    /// Wire value of `msgtype`.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Link { .. } => "link",
            Self::Markdown { .. } => "markdown",
            Self::ActionCard { .. } => "actionCard",
            Self::FeedCard { .. } => "feedCard",
        }
    }

    /// Serialize to the JSON request body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone)]
pub struct TextBuilder {
    content: String,
    at: AtTarget,
}

impl TextBuilder {
    pub fn at_mobiles<I, S>(mut self, mobiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at.at_mobiles.extend(mobiles.into_iter().map(Into::into));
        self
    }

    pub fn at_user_ids<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at.at_user_ids.extend(user_ids.into_iter().map(Into::into));
        self
    }

    pub fn at_all(mut self) -> Self {
        self.at.is_at_all = true;
        self
    }

    pub fn build(self) -> Message {
        Message::Text {
            text: TextContent {
                content: self.content,
            },
            at: self.at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkBuilder {
    title: String,
    text: String,
    message_url: String,
    pic_url: Option<String>,
}

impl LinkBuilder {
    pub fn with_picture(mut self, pic_url: impl Into<String>) -> Self {
        self.pic_url = Some(pic_url.into());
        self
    }

    pub fn build(self) -> Message {
        Message::Link {
            link: LinkContent {
                title: self.title,
                text: self.text,
                message_url: self.message_url,
                pic_url: self.pic_url.filter(|url| !url.is_empty()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownBuilder {
    title: String,
    text: String,
    at: AtTarget,
}

impl MarkdownBuilder {
    pub fn at_mobiles<I, S>(mut self, mobiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at.at_mobiles.extend(mobiles.into_iter().map(Into::into));
        self
    }

    pub fn at_user_ids<I, S>(mut self, user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.at.at_user_ids.extend(user_ids.into_iter().map(Into::into));
        self
    }

    pub fn at_all(mut self) -> Self {
        self.at.is_at_all = true;
        self
    }

    pub fn build(self) -> Message {
        Message::Markdown {
            markdown: MarkdownContent {
                title: self.title,
                text: self.text,
            },
            at: self.at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionCardBuilder {
    title: String,
    text: String,
    orientation: ButtonOrientation,
    single: Option<(String, String)>,
    buttons: Vec<Button>,
}

impl ActionCardBuilder {
    /// Make the whole card one link. Takes priority over `add_button`.
    pub fn single_button(mut self, title: impl Into<String>, action_url: impl Into<String>) -> Self {
        self.single = Some((title.into(), action_url.into()));
        self
    }

    pub fn add_button(mut self, title: impl Into<String>, action_url: impl Into<String>) -> Self {
        self.buttons.push(Button {
            title: title.into(),
            action_url: action_url.into(),
        });
        self
    }

    pub fn horizontal(mut self) -> Self {
        self.orientation = ButtonOrientation::Horizontal;
        self
    }

    pub fn vertical(mut self) -> Self {
        self.orientation = ButtonOrientation::Vertical;
        self
    }

    pub fn build(self) -> Message {
        let (single_title, single_url, btns) = match self.single {
            Some((title, url)) if !title.is_empty() => (Some(title), Some(url), Vec::new()),
            _ => (None, None, self.buttons),
        };

        Message::ActionCard {
            action_card: ActionCardContent {
                title: self.title,
                text: self.text,
                btn_orientation: self.orientation,
                single_title,
                single_url,
                btns,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedCardBuilder {
    links: Vec<FeedLink>,
}

impl FeedCardBuilder {
    pub fn add_link(
        mut self,
        title: impl Into<String>,
        message_url: impl Into<String>,
        pic_url: impl Into<String>,
    ) -> Self {
        self.links.push(FeedLink {
            title: title.into(),
            message_url: message_url.into(),
            pic_url: pic_url.into(),
        });
        self
    }

    pub fn build(self) -> Message {
        Message::FeedCard {
            feed_card: FeedCardContent { links: self.links },
        }
    }
}

macro_rules! into_message {
    ($($builder:ty),* $(,)?) => {
        $(
            impl From<$builder> for Message {
                fn from(builder: $builder) -> Self {
                    builder.build()
                }
            }
        )*
    };
}

into_message!(
    TextBuilder,
    LinkBuilder,
    MarkdownBuilder,
    ActionCardBuilder,
    FeedCardBuilder,
);
