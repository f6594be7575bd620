//! Collaborators behind trait seams: the message broker and the NER model.

pub mod broker;
pub mod model;

pub use broker::{
    BrokerClient, BrokerEvent, EventSource, MqttBroker, MqttEvents, PublishedMessage, QoS,
    TestBroker,
};
pub use model::{EntityModel, GlinerModel};
