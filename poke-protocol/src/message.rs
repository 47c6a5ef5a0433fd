//! Typed application messages.
//!
//! A [`Message`] is what the session layer sends and receives; on the wire
//! it is a [`Kind`] tag in the packet header plus a JSON body in the
//! payload.  Battle bodies come from `poke_battle::payload`; the handshake
//! and farewell bodies are defined here.

use poke_battle::{
    AttackDeclaration, ChatMessage, Creature, ErrorReport, ProtocolViolation, Role, StatusReport,
};
use serde::{Deserialize, Serialize};

use crate::packet::Kind;

/// Bumped whenever the message bodies change incompatibly.
pub const PROTOCOL_VERSION: u16 = 1;

/// Longest trainer name, in characters, accepted in HELLO / HELLO_ACK.
pub const MAX_TRAINER_LEN: usize = 32;

/// Client → host: "I want to battle, here is my creature."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u16,
    pub trainer: String,
    pub participant: Creature,
}

/// Host → client: accepts the battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    pub protocol_version: u16,
    pub trainer: String,
    pub participant: Creature,
    /// Seeds both sides' roll generators.
    pub seed: u64,
    /// Always [`Role::Host`].
    pub first_turn: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    HelloAck(HelloAck),
    Attack(AttackDeclaration),
    Chat(ChatMessage),
    Status(StatusReport),
    Bye(Goodbye),
    Error(ErrorReport),
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Message::Hello(_) => Kind::Hello,
            Message::HelloAck(_) => Kind::HelloAck,
            Message::Attack(_) => Kind::Attack,
            Message::Chat(_) => Kind::Chat,
            Message::Status(_) => Kind::Status,
            Message::Bye(_) => Kind::Bye,
            Message::Error(_) => Kind::Error,
        }
    }

    /// JSON body for the packet payload.
    pub fn encode_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Hello(m) => serde_json::to_vec(m),
            Message::HelloAck(m) => serde_json::to_vec(m),
            Message::Attack(m) => serde_json::to_vec(m),
            Message::Chat(m) => serde_json::to_vec(m),
            Message::Status(m) => serde_json::to_vec(m),
            Message::Bye(m) => serde_json::to_vec(m),
            Message::Error(m) => serde_json::to_vec(m),
        }
    }

    /// Rebuild a message from its kind tag and JSON body.
    ///
    /// An empty BYE body is accepted as a reason-less goodbye.
    pub fn decode(kind: Kind, body: &[u8]) -> Result<Message, ProtocolViolation> {
        fn parse<'a, T: Deserialize<'a>>(kind: Kind, body: &'a [u8]) -> Result<T, ProtocolViolation> {
            serde_json::from_slice(body)
                .map_err(|e| ProtocolViolation::Malformed(format!("{kind} body: {e}")))
        }

        Ok(match kind {
            Kind::Hello => Message::Hello(parse(kind, body)?),
            Kind::HelloAck => Message::HelloAck(parse(kind, body)?),
            Kind::Attack => Message::Attack(parse(kind, body)?),
            Kind::Chat => Message::Chat(parse(kind, body)?),
            Kind::Status => Message::Status(parse(kind, body)?),
            Kind::Bye if body.is_empty() => Message::Bye(Goodbye::default()),
            Kind::Bye => Message::Bye(parse(kind, body)?),
            Kind::Error => Message::Error(parse(kind, body)?),
            Kind::Ack => {
                return Err(ProtocolViolation::Malformed(
                    "ACK is not an application message".into(),
                ))
            }
        })
    }
}
