//! Message payloads and the codec that turns them into bytes.

use crate::envelope::encode_envelope;
use crate::error::{ProtocolError, ProtocolResult};
use crate::request::RequestTarget;
use ogre_core::{GraphUpdate, TypeDomain};
use serde::{Deserialize, Serialize};

/// Everything that travels inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Client to server: what a request is about.
    Request(RequestTarget),
    /// Reply to `FetchTypeDomain`.
    TypeDomain(TypeDomain),
    /// Reply to `FetchSnapshot`: full contents as creates.
    Snapshot(GraphUpdate),
    /// One element of a subscription stream.
    Update(GraphUpdate),
    /// The requested type domain or object graph is not served here.
    NotFound(String),
}

impl WireMessage {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Request(_) => "request",
            WireMessage::TypeDomain(_) => "type-domain",
            WireMessage::Snapshot(_) => "snapshot",
            WireMessage::Update(_) => "update",
            WireMessage::NotFound(_) => "not-found",
        }
    }
}

/// Serialises messages to and from envelope payloads.
pub trait MessageCodec: Send + Sync {
    /// Encodes a message.
    fn encode(&self, message: &WireMessage) -> ProtocolResult<Vec<u8>>;

    /// Decodes a message.
    fn decode(&self, bytes: &[u8]) -> ProtocolResult<WireMessage>;
}

/// CBOR codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl MessageCodec for CborCodec {
    fn encode(&self, message: &WireMessage) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(message, &mut bytes).map_err(|e| ProtocolError::codec(e.to_string()))?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> ProtocolResult<WireMessage> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::codec(e.to_string()))
    }
}

/// Encodes a message and wraps it in an envelope.
pub fn frame(codec: &dyn MessageCodec, message: &WireMessage) -> ProtocolResult<Vec<u8>> {
    encode_envelope(&codec.encode(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{read_envelope, DEFAULT_MAX_PAYLOAD_LEN};
    use ogre_core::{
        EntityDiff, EntityId, EntityKey, EntityReference, EntityTypeDef, EntityValue,
        PropertyDef, TypeCode, TypeDomainDef, Value,
    };
    use proptest::prelude::*;
    use std::io::Cursor;

    fn domain() -> TypeDomain {
        TypeDomainDef::new("social")
            .with_entity_type(
                EntityTypeDef::new("Person")
                    .with_property(PropertyDef::new("name", TypeCode::String))
                    .with_property(PropertyDef::new("age", TypeCode::Int32).nullable(true)),
            )
            .with_entity_type(
                EntityTypeDef::new("Likes")
                    .with_property(PropertyDef::reference("from", "Person"))
                    .with_property(PropertyDef::reference("to", "Person")),
            )
            .build()
            .unwrap()
    }

    fn id(n: u64) -> EntityId {
        EntityId::new(n).unwrap()
    }

    #[test]
    fn type_domain_survives_the_wire() {
        let codec = CborCodec;
        let message = WireMessage::TypeDomain(domain());
        let decoded = codec.decode(&codec.encode(&message).unwrap()).unwrap();
        let WireMessage::TypeDomain(decoded) = decoded else {
            panic!("wrong kind");
        };
        // references are re-resolved on decode
        let likes = decoded.entity_type_by_name("Likes").unwrap();
        assert_eq!(likes.property(0).unwrap().target_index(), Some(0));
        assert_eq!(decoded, domain());
    }

    #[test]
    fn update_survives_a_framed_round_trip() {
        let codec = CborCodec;
        let mut update = GraphUpdate::new("social", "main").with_version(7, 42);
        update
            .creates
            .push(EntityValue::new(0, id(1), vec!["Alice".into(), Value::Null]));
        update.creates.push(EntityValue::new(
            1,
            id(2),
            vec![Value::Reference(id(1)), Value::Reference(id(1))],
        ));
        let mut diff = EntityDiff::new(EntityKey::new(0, id(1)), 2);
        diff.set(1, Value::Int32(31));
        update.updates.push(diff);
        update
            .deletes
            .push(EntityReference::new(EntityKey::new(0, id(9))));

        let message = WireMessage::Update(update);
        let bytes = frame(&codec, &message).unwrap();
        let payload = read_envelope(&mut Cursor::new(bytes), DEFAULT_MAX_PAYLOAD_LEN).unwrap();
        assert_eq!(codec.decode(&payload).unwrap(), message);
    }

    #[test]
    fn not_found_and_request() {
        let codec = CborCodec;
        for message in [
            WireMessage::NotFound("social/missing".into()),
            WireMessage::Request(RequestTarget::new("social", "main")),
        ] {
            assert_eq!(codec.decode(&codec.encode(&message).unwrap()).unwrap(), message);
        }
    }

    #[test]
    fn invalid_type_domain_is_rejected_on_decode() {
        #[derive(Serialize)]
        enum Raw {
            TypeDomain(TypeDomainDef),
        }
        let bad = TypeDomainDef::new("d").with_entity_type(
            EntityTypeDef::new("A").with_property(PropertyDef::reference("b", "Missing")),
        );
        let mut bytes = Vec::new();
        ciborium::into_writer(&Raw::TypeDomain(bad), &mut bytes).unwrap();
        assert!(matches!(CborCodec.decode(&bytes), Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            CborCodec.decode(&[0xff, 0x00, 0x13]),
            Err(ProtocolError::Codec(_))
        ));
    }

    #[test]
    fn kinds() {
        assert_eq!(WireMessage::NotFound(String::new()).kind(), "not-found");
        assert_eq!(
            WireMessage::Snapshot(GraphUpdate::new("d", "g")).kind(),
            "snapshot"
        );
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i32>().prop_map(Value::Int32),
            any::<i64>().prop_map(Value::Int64),
            (-1.0e9f64..1.0e9).prop_map(Value::Float64),
            "[a-zA-Z ]{0,12}".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            (1u64..=ogre_core::MAX_ENTITY_ID).prop_map(|n| Value::Reference(id(n))),
        ]
    }

    const SCALARS: [TypeCode; 6] = [
        TypeCode::Int32,
        TypeCode::Int64,
        TypeCode::Float32,
        TypeCode::Float64,
        TypeCode::String,
        TypeCode::Bytes,
    ];

    /// Random domains of up to five types. A slot picks a scalar code or
    /// references any type by index, so self and mutual references occur.
    fn domain_strategy() -> impl Strategy<Value = TypeDomainDef> {
        (1usize..6)
            .prop_flat_map(|types| {
                proptest::collection::vec(
                    proptest::collection::vec(
                        (0usize..=SCALARS.len(), 0..types, any::<bool>()),
                        0..5,
                    ),
                    types,
                )
            })
            .prop_map(|types| {
                types.iter().enumerate().fold(
                    TypeDomainDef::new("generated"),
                    |domain, (t, slots)| {
                        let entity_type = slots.iter().enumerate().fold(
                            EntityTypeDef::new(format!("T{t}")),
                            |entity_type, (p, &(code, target, nullable))| {
                                let property = match SCALARS.get(code) {
                                    Some(&code) => PropertyDef::new(format!("p{p}"), code),
                                    None => PropertyDef::reference(
                                        format!("p{p}"),
                                        format!("T{target}"),
                                    ),
                                };
                                entity_type.with_property(property.nullable(nullable))
                            },
                        );
                        domain.with_entity_type(entity_type)
                    },
                )
            })
    }

    proptest! {
        #[test]
        fn any_type_domain_roundtrips(def in domain_strategy()) {
            let domain = def.build().unwrap();
            let bytes = frame(&CborCodec, &WireMessage::TypeDomain(domain.clone())).unwrap();
            let payload = read_envelope(&mut Cursor::new(bytes), DEFAULT_MAX_PAYLOAD_LEN).unwrap();
            let WireMessage::TypeDomain(decoded) = CborCodec.decode(&payload).unwrap() else {
                panic!("wrong kind");
            };
            for (sent, received) in domain.entity_types().iter().zip(decoded.entity_types()) {
                prop_assert_eq!(sent.referrers(), received.referrers());
                for (a, b) in sent.properties().iter().zip(received.properties()) {
                    prop_assert_eq!(a.target_index(), b.target_index());
                }
            }
            prop_assert_eq!(decoded, domain);
        }

        #[test]
        fn update_roundtrip(
            version in any::<u32>(),
            scheme in any::<u32>(),
            rows in proptest::collection::vec(
                (0usize..4, 1u64..1000, proptest::collection::vec(value_strategy(), 0..5)),
                0..8,
            ),
        ) {
            let mut update = GraphUpdate::new("d", "g").with_version(version, scheme);
            for (type_index, n, values) in rows {
                update.creates.push(EntityValue::new(type_index, id(n), values.clone()));
                let mut diff = EntityDiff::new(EntityKey::new(type_index, id(n)), 0);
                for (slot, value) in values.into_iter().enumerate().step_by(2) {
                    diff.set(slot, value);
                }
                update.updates.push(diff);
            }
            let message = WireMessage::Update(update);
            let decoded = CborCodec.decode(&CborCodec.encode(&message).unwrap()).unwrap();
            prop_assert_eq!(decoded, message);
        }
    }
}
