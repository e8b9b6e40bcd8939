//! Subset of the provider's protobuf `Message` record the bridge reads.
//!
//! Fields not listed here are skipped by the decoder, so new content kinds
//! decode to an all-empty record instead of failing.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub image_message: Option<MediaMessage>,
    #[prost(message, optional, tag = "4")]
    pub contact_message: Option<ContactMessage>,
    #[prost(message, optional, tag = "5")]
    pub location_message: Option<LocationMessage>,
    #[prost(message, optional, tag = "6")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[prost(message, optional, tag = "7")]
    pub document_message: Option<MediaMessage>,
    #[prost(message, optional, tag = "8")]
    pub audio_message: Option<MediaMessage>,
    #[prost(message, optional, tag = "9")]
    pub video_message: Option<MediaMessage>,
    #[prost(message, optional, tag = "26")]
    pub sticker_message: Option<MediaMessage>,
    #[prost(message, optional, tag = "46")]
    pub reaction_message: Option<ReactionMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExtendedTextMessage {
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaMessage {
    #[prost(string, optional, tag = "2")]
    pub mimetype: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub caption: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactMessage {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocationMessage {
    #[prost(double, optional, tag = "1")]
    pub degrees_latitude: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub degrees_longitude: Option<f64>,
    #[prost(string, optional, tag = "3")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReactionMessage {
    #[prost(string, optional, tag = "3")]
    pub text: Option<String>,
}
