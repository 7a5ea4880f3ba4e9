//! Frame reassembly under arbitrary chunking.

use engine_component::{ComponentId, Entity};
use engine_net::{CrdtMessage, FrameReader, decode, encode, encode_into};
use proptest::prelude::*;

fn message_strategy() -> impl Strategy<Value = CrdtMessage> {
    let entity = any::<u32>().prop_map(Entity::from_raw);
    let component = any::<u32>().prop_map(ComponentId);
    let data = prop::collection::vec(any::<u8>(), 0..40);
    prop_oneof![
        (entity.clone(), component.clone(), any::<u32>(), data.clone()).prop_map(
            |(entity, component, timestamp, data)| CrdtMessage::PutComponent {
                entity,
                component,
                timestamp,
                data,
            }
        ),
        (entity.clone(), component.clone(), any::<u32>()).prop_map(
            |(entity, component, timestamp)| CrdtMessage::DeleteComponent {
                entity,
                component,
                timestamp,
            }
        ),
        entity.clone().prop_map(|entity| CrdtMessage::DeleteEntity { entity }),
        (entity, component, any::<u32>(), data).prop_map(
            |(entity, component, timestamp, data)| CrdtMessage::AppendValue {
                entity,
                component,
                timestamp,
                data,
            }
        ),
    ]
}

proptest! {
    #[test]
    fn reader_yields_every_frame_regardless_of_chunking(
        messages in prop::collection::vec(message_strategy(), 0..12),
        chunk in 1usize..64,
    ) {
        let mut stream = Vec::new();
        for message in &messages {
            encode_into(message, &mut stream);
        }

        let mut reader = FrameReader::default();
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk) {
            reader.extend(piece);
            while let Some(frame) = reader.next_frame() {
                decoded.push(frame.unwrap());
            }
        }
        prop_assert_eq!(decoded, messages);
        prop_assert_eq!(reader.buffered_len(), 0);
    }

    #[test]
    fn truncated_frames_never_decode(message in message_strategy(), cut in 0usize..64) {
        let frame = encode(&message);
        let cut = cut % frame.len();
        prop_assert!(decode(&frame[..cut]).is_err());
    }
}
