// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codec properties: any concatenation of encoded messages, split at
//! arbitrary byte offsets, must reassemble to the original sequence.

use crate::{encode, FrameCodec};
use proptest::prelude::*;

fn message_strategy() -> impl Strategy<Value = serde_json::Value> {
    // Payload strings may contain anything except the delimiter, which
    // serde_json escapes anyway for control characters; keep the generator
    // on plain printable text plus unicode to exercise multi-byte splits.
    (any::<u64>(), "[a-zA-Z0-9 /:@._\\-äöüæøå]{0,40}").prop_map(|(id, text)| {
        serde_json::json!({"type": "data", "id": id, "source": "stdout", "data": text})
    })
}

proptest! {
    #[test]
    fn split_feeding_preserves_messages(
        messages in prop::collection::vec(message_strategy(), 0..8),
        chunk_sizes in prop::collection::vec(1usize..17, 0..64),
    ) {
        let mut stream = Vec::new();
        for msg in &messages {
            stream.extend(encode(msg).unwrap());
        }

        let mut codec = FrameCodec::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.into_iter().cycle();
        while offset < stream.len() {
            let n = sizes.next().unwrap_or(1).min(stream.len() - offset);
            for frame in codec.feed(&stream[offset..offset + n]).unwrap() {
                decoded.push(FrameCodec::parse::<serde_json::Value>(&frame).unwrap());
            }
            offset += n;
        }

        prop_assert_eq!(decoded, messages);
        prop_assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn encoded_payload_never_contains_delimiter(msg in message_strategy()) {
        let bytes = encode(&msg).unwrap();
        prop_assert_eq!(bytes.iter().filter(|b| **b == crate::DELIMITER).count(), 1);
    }
}
