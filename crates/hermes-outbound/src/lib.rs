//! Outbound collaborators used when a report window closes or idles:
//! chat notifiers that push a report link to a chat, and artifact resolvers
//! that turn a report start time into that link.

mod artifact;
mod notifier;

pub use artifact::{
    artifact_name, ArtifactError, ArtifactResolver, DriveArtifactConfig, DriveArtifactResolver,
    TemplateArtifactResolver,
};
pub use notifier::{
    DeliveryError, DeliveryReceipt, HttpNotifier, Notifier, NotifierConfig, NotifierMode,
};
