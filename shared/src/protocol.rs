//! Wire protocol: JSON text frames tagged with an integer `type`.
//!
//! | tag | message            | direction        |
//! |-----|--------------------|------------------|
//! | 1   | JOIN_REQUEST       | client -> server |
//! | 2   | JOIN_RESPONSE      | server -> client |
//! | 3   | PLAYER_INPUT       | client -> server |
//! | 4   | GAME_STATE         | server -> client |
//! | 5   | JUMP_COMMAND       | client -> server |
//! | 6   | SPAWN_DUMMIES      | client -> server |
//! | 7   | DELETE_ALL_DUMMIES | client -> server |
//!
//! Payload fields sit next to `type` in the same object, e.g.
//! `{"type":3,"playerId":7,"x":0.0,"y":0.0,"z":1.0}`. Unknown fields are ignored.

use crate::math::{Rgb, Vec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    JoinRequest = 1,
    JoinResponse = 2,
    PlayerInput = 3,
    GameState = 4,
    JumpCommand = 5,
    SpawnDummies = 6,
    DeleteAllDummies = 7,
}

impl MessageType {
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(MessageType::JoinRequest),
            2 => Some(MessageType::JoinResponse),
            3 => Some(MessageType::PlayerInput),
            4 => Some(MessageType::GameState),
            5 => Some(MessageType::JumpCommand),
            6 => Some(MessageType::SpawnDummies),
            7 => Some(MessageType::DeleteAllDummies),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::JoinRequest => "JOIN_REQUEST",
            MessageType::JoinResponse => "JOIN_RESPONSE",
            MessageType::PlayerInput => "PLAYER_INPUT",
            MessageType::GameState => "GAME_STATE",
            MessageType::JumpCommand => "JUMP_COMMAND",
            MessageType::SpawnDummies => "SPAWN_DUMMIES",
            MessageType::DeleteAllDummies => "DELETE_ALL_DUMMIES",
        }
    }

    /// Messages only the server is supposed to send.
    pub fn is_server_bound(self) -> bool {
        !matches!(self, MessageType::JoinResponse | MessageType::GameState)
    }

    fn required_fields(self) -> &'static [&'static str] {
        match self {
            MessageType::JoinRequest => &["nickname", "color"],
            MessageType::JoinResponse => &["success"],
            MessageType::PlayerInput => &["playerId", "x", "y", "z"],
            MessageType::GameState => &["players", "dummies"],
            MessageType::JumpCommand => &["playerId"],
            MessageType::SpawnDummies => &["count"],
            MessageType::DeleteAllDummies => &[],
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a json object")]
    NotAnObject,
    #[error("message has no `type` field")]
    MissingType,
    #[error("message `type` is not a non-negative integer")]
    InvalidType,
    #[error("unknown message type {0}")]
    UnknownType(u64),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub nickname: String,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nickname: String,
    /// Rejection reason; empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl JoinResponse {
    pub fn accepted(player_id: u32, nickname: impl Into<String>) -> Self {
        Self {
            success: true,
            player_id: Some(player_id),
            nickname: nickname.into(),
            message: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            player_id: None,
            nickname: String::new(),
            message: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInput {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl PlayerInput {
    pub fn new(player_id: u32, movement: Vec3) -> Self {
        Self {
            player_id,
            x: movement.x,
            y: movement.y,
            z: movement.z,
        }
    }

    pub fn movement(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpCommand {
    pub player_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnDummies {
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Dummy,
}

/// Read-only view of one entity as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: u32,
    #[serde(rename = "pos")]
    pub position: Vec3,
    /// Only sent for players.
    #[serde(rename = "vel", default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<Vec3>,
    #[serde(default)]
    pub color: Rgb,
    #[serde(default)]
    pub yaw: f32,
    /// Only sent for players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Complete world state after one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tick: u64,
    pub players: Vec<EntityView>,
    pub dummies: Vec<EntityView>,
}

impl Snapshot {
    pub fn entity_count(&self) -> usize {
        self.players.len() + self.dummies.len()
    }

    /// All entities tagged with their kind, players first.
    pub fn entities(&self) -> impl Iterator<Item = (EntityKind, &EntityView)> {
        self.players
            .iter()
            .map(|view| (EntityKind::Player, view))
            .chain(self.dummies.iter().map(|view| (EntityKind::Dummy, view)))
    }

    pub fn find(&self, id: u32) -> Option<&EntityView> {
        self.entities().map(|(_, view)| view).find(|view| view.id == id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.find(id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    JoinRequest(JoinRequest),
    JoinResponse(JoinResponse),
    PlayerInput(PlayerInput),
    GameState(Snapshot),
    JumpCommand(JumpCommand),
    SpawnDummies(SpawnDummies),
    DeleteAllDummies,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::JoinRequest(_) => MessageType::JoinRequest,
            Message::JoinResponse(_) => MessageType::JoinResponse,
            Message::PlayerInput(_) => MessageType::PlayerInput,
            Message::GameState(_) => MessageType::GameState,
            Message::JumpCommand(_) => MessageType::JumpCommand,
            Message::SpawnDummies(_) => MessageType::SpawnDummies,
            Message::DeleteAllDummies => MessageType::DeleteAllDummies,
        }
    }

    pub fn encode(&self) -> String {
        let payload = match self {
            Message::JoinRequest(request) => to_object(request),
            Message::JoinResponse(response) => to_object(response),
            Message::PlayerInput(input) => to_object(input),
            Message::GameState(snapshot) => return encode_snapshot(snapshot),
            Message::JumpCommand(jump) => to_object(jump),
            Message::SpawnDummies(spawn) => to_object(spawn),
            Message::DeleteAllDummies => Map::new(),
        };
        tagged(self.message_type(), payload)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let tag = object
            .get("type")
            .ok_or(ProtocolError::MissingType)?
            .as_u64()
            .ok_or(ProtocolError::InvalidType)?;
        let kind = MessageType::from_tag(tag).ok_or(ProtocolError::UnknownType(tag))?;

        if let Some(field) = kind
            .required_fields()
            .iter()
            .find(|field| !object.contains_key(**field))
        {
            return Err(ProtocolError::MissingField(*field));
        }

        let value = Value::Object(object);
        let message = match kind {
            MessageType::JoinRequest => Message::JoinRequest(payload(kind, value)?),
            MessageType::JoinResponse => Message::JoinResponse(payload(kind, value)?),
            MessageType::PlayerInput => Message::PlayerInput(payload(kind, value)?),
            MessageType::GameState => Message::GameState(payload(kind, value)?),
            MessageType::JumpCommand => Message::JumpCommand(payload(kind, value)?),
            MessageType::SpawnDummies => Message::SpawnDummies(payload(kind, value)?),
            MessageType::DeleteAllDummies => Message::DeleteAllDummies,
        };
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Message::JoinRequest(request) if !request.color.is_finite() => {
                Err(ProtocolError::NonFinite("color"))
            }
            Message::JoinResponse(response) if response.success && response.player_id.is_none() => {
                Err(ProtocolError::MissingField("playerId"))
            }
            Message::PlayerInput(input) if !input.movement().is_finite() => {
                Err(ProtocolError::NonFinite("x/y/z"))
            }
            Message::GameState(snapshot) => {
                for (_, view) in snapshot.entities() {
                    if !view.position.is_finite() {
                        return Err(ProtocolError::NonFinite("pos"));
                    }
                    if !view.yaw.is_finite() {
                        return Err(ProtocolError::NonFinite("yaw"));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Encodes a GAME_STATE frame without taking ownership of the snapshot.
pub fn encode_snapshot(snapshot: &Snapshot) -> String {
    tagged(MessageType::GameState, to_object(snapshot))
}

fn to_object<T: Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(object)) => object,
        _ => Map::new(),
    }
}

fn tagged(kind: MessageType, mut object: Map<String, Value>) -> String {
    object.insert("type".to_string(), Value::from(kind.tag()));
    Value::Object(object).to_string()
}

fn payload<T: DeserializeOwned>(kind: MessageType, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.name(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            tick: 42,
            players: vec![EntityView {
                id: 1,
                position: Vec3::new(1.0, 0.0, -2.5),
                velocity: Some(Vec3::new(5.0, 0.0, 0.0)),
                color: Rgb::new(1.0, 0.5, 0.0),
                yaw: 1.5,
                nickname: Some("alice".to_string()),
            }],
            dummies: vec![EntityView {
                id: 2,
                position: Vec3::new(-3.0, 0.5, 4.0),
                velocity: None,
                color: Rgb::new(0.2, 0.9, 0.3),
                yaw: -0.25,
                nickname: None,
            }],
        }
    }

    fn round_trip(message: Message) {
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_round_trip_every_message_type() {
        round_trip(Message::JoinRequest(JoinRequest {
            nickname: "alice".to_string(),
            color: Rgb::new(0.1, 0.2, 0.3),
        }));
        round_trip(Message::JoinResponse(JoinResponse::accepted(7, "alice")));
        round_trip(Message::JoinResponse(JoinResponse::rejected("Server is full")));
        round_trip(Message::PlayerInput(PlayerInput::new(7, Vec3::new(0.6, 0.0, -0.8))));
        round_trip(Message::GameState(sample_snapshot()));
        round_trip(Message::JumpCommand(JumpCommand { player_id: 7 }));
        round_trip(Message::SpawnDummies(SpawnDummies { count: 10 }));
        round_trip(Message::DeleteAllDummies);
    }

    #[test]
    fn test_encode_carries_integer_tag() {
        let text = Message::DeleteAllDummies.encode();
        assert_eq!(text, r#"{"type":7}"#);

        let value: Value = serde_json::from_str(&Message::GameState(sample_snapshot()).encode()).unwrap();
        assert_eq!(value["type"], 4);
        assert_eq!(value["players"][0]["pos"], serde_json::json!([1.0, 0.0, -2.5]));
        assert!(value["dummies"][0].get("vel").is_none());
    }

    #[test]
    fn test_decode_client_wire_format() {
        let join = Message::decode(r#"{"type":1,"nickname":"Dummy_3","color":[0.5,0.25,1.0]}"#).unwrap();
        assert_eq!(
            join,
            Message::JoinRequest(JoinRequest {
                nickname: "Dummy_3".to_string(),
                color: Rgb::new(0.5, 0.25, 1.0),
            })
        );

        let input = Message::decode(r#"{"type":3,"playerId":4,"x":0.5,"y":0,"z":-0.5}"#).unwrap();
        assert_eq!(
            input,
            Message::PlayerInput(PlayerInput::new(4, Vec3::new(0.5, 0.0, -0.5)))
        );

        let jump = Message::decode(r#"{"type":5,"playerId":4}"#).unwrap();
        assert_eq!(jump, Message::JumpCommand(JumpCommand { player_id: 4 }));
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let message = Message::decode(r#"{"type":6,"count":3,"extra":"ignored"}"#).unwrap();
        assert_eq!(message, Message::SpawnDummies(SpawnDummies { count: 3 }));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(Message::decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(Message::decode("[1,2,3]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(Message::decode(r#"{"count":3}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(Message::decode(r#"{"type":"3"}"#), Err(ProtocolError::InvalidType)));
        assert!(matches!(Message::decode(r#"{"type":-1}"#), Err(ProtocolError::InvalidType)));
        assert!(matches!(Message::decode(r#"{"type":99}"#), Err(ProtocolError::UnknownType(99))));
        assert!(matches!(
            Message::decode(r#"{"type":3,"playerId":1,"x":0,"y":0}"#),
            Err(ProtocolError::MissingField("z"))
        ));
        assert!(matches!(
            Message::decode(r#"{"type":6,"count":"many"}"#),
            Err(ProtocolError::InvalidPayload { kind: "SPAWN_DUMMIES", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_overflowing_floats() {
        let result = Message::decode(r#"{"type":3,"playerId":1,"x":1e39,"y":0,"z":0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_join_response_success_requires_player_id() {
        assert!(matches!(
            Message::decode(r#"{"type":2,"success":true}"#),
            Err(ProtocolError::MissingField("playerId"))
        ));

        let rejected = Message::decode(r#"{"type":2,"success":false}"#).unwrap();
        match rejected {
            Message::JoinResponse(response) => {
                assert!(!response.success);
                assert!(response.message.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.entity_count(), 2);
        assert!(snapshot.contains(2));
        assert!(!snapshot.contains(3));
        let kinds: Vec<EntityKind> = snapshot.entities().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![EntityKind::Player, EntityKind::Dummy]);
    }

    #[test]
    fn test_message_type_tags() {
        for tag in 1..=7u64 {
            let kind = MessageType::from_tag(tag).unwrap();
            assert_eq!(kind.tag() as u64, tag);
        }
        assert_eq!(MessageType::from_tag(0), None);
        assert!(MessageType::PlayerInput.is_server_bound());
        assert!(!MessageType::GameState.is_server_bound());
    }
}
