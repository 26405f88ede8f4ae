use lapin::{message::Delivery, BasicProperties};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message as it travels over the broker: the payload plus the
/// correlation id and reply address that tie a reply back to its call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub correlation_id: String,
    pub reply_to: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn request(correlation_id: String, reply_to: String, body: Vec<u8>) -> Self {
        Self {
            correlation_id,
            reply_to,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body,
        }
    }

    /// Builds the reply to this request. The correlation id is copied
    /// verbatim; a reply carries no reply address of its own.
    pub fn reply(&self, body: Vec<u8>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            reply_to: String::new(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            body,
        }
    }

    pub fn properties(&self) -> BasicProperties {
        let properties = BasicProperties::default()
            .with_correlation_id(self.correlation_id.clone().into())
            .with_content_type(self.content_type.clone().into());

        if self.reply_to.is_empty() {
            properties
        } else {
            properties.with_reply_to(self.reply_to.clone().into())
        }
    }

    /// Reads an envelope out of a request delivery. Returns `None` when the
    /// delivery lacks a correlation id or reply address.
    pub fn from_request(delivery: &Delivery) -> Option<Self> {
        let correlation_id = delivery.properties.correlation_id().as_ref()?;
        let reply_to = delivery.properties.reply_to().as_ref()?;
        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_owned())
            .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

        Some(Self {
            correlation_id: correlation_id.as_str().to_owned(),
            reply_to: reply_to.as_str().to_owned(),
            content_type,
            body: delivery.data.clone(),
        })
    }
}

/// An inbound message from the reply queue, reduced to what routing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDelivery {
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl From<Delivery> for ReplyDelivery {
    fn from(delivery: Delivery) -> Self {
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_owned());

        Self {
            correlation_id,
            body: delivery.data,
        }
    }
}

impl From<Envelope> for ReplyDelivery {
    fn from(envelope: Envelope) -> Self {
        Self {
            correlation_id: Some(envelope.correlation_id),
            body: envelope.body,
        }
    }
}
