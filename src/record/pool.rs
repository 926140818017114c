//! Process-wide free-list of pooled messages.
//!
//! `get` hands out a message whose packed record is already allocated;
//! `put` returns it. Both are lock-free and safe from any task. Record
//! contents are not reset on release; the next `pack` overwrites them. The
//! diversion origin marker is cleared on `get`, so delivery metadata never
//! leaks from one use of a message into the next.

use crossbeam_queue::SegQueue;
use once_cell::sync::Lazy;

use super::Message;

static POOL: Lazy<SegQueue<Message>> = Lazy::new(SegQueue::new);

/// Borrows a message from the pool, allocating one if the pool is empty.
/// The origin marker of a recycled message is cleared.
pub fn get() -> Message {
    let mut msg = POOL.pop().unwrap_or_else(Message::preallocated);
    msg.clear_origin();
    msg
}

/// Returns a message to the pool.
pub fn put(msg: Message) {
    POOL.push(msg);
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::record::schema::{
        CONTENT_KEY, FORMER_MESSAGE_KEY, HOSTNAME_KEY, MESSAGE_KEY, PRIORITY_KEY,
        STRUCTURED_DATA_KEY, TAG_KEY,
    };
    use crate::record::{LogParts, PartValue};

    fn random_text(rng: &mut SmallRng) -> String {
        let len = rng.random_range(0..200);
        (0..len)
            .map(|_| char::from(rng.random_range(b'a'..=b'z')))
            .collect()
    }

    fn random_parts(rng: &mut SmallRng, marker: &str) -> (LogParts, Option<String>) {
        match rng.random_range(0..3) {
            0 => (
                LogParts::from([(
                    FORMER_MESSAGE_KEY,
                    PartValue::Text(format!("{marker}:{}", random_text(rng))),
                )]),
                Some("unparseable".to_string()),
            ),
            1 => (
                LogParts::from([
                    (PRIORITY_KEY, PartValue::Int(rng.random_range(0..192))),
                    (TAG_KEY, PartValue::Text(marker.to_string())),
                    (CONTENT_KEY, PartValue::Text(random_text(rng))),
                ]),
                None,
            ),
            _ => (
                LogParts::from([
                    (PRIORITY_KEY, PartValue::Int(rng.random_range(0..192))),
                    (HOSTNAME_KEY, PartValue::Text(marker.to_string())),
                    (STRUCTURED_DATA_KEY, PartValue::Text(random_text(rng))),
                    (MESSAGE_KEY, PartValue::Text(random_text(rng))),
                ]),
                None,
            ),
        }
    }

    #[test]
    fn reuse_does_not_cross_contaminate() {
        let mut rng = SmallRng::seed_from_u64(41);
        for round in 0..10_000 {
            let marker = format!("round-{round}");
            let (mut parts, parse_error) = random_parts(&mut rng, &marker);
            let expected: std::collections::HashMap<_, _> = {
                let mut msg = get();
                msg.record_mut()
                    .pack(&mut parts, parse_error.as_deref())
                    .expect("pack succeeds");
                let map = msg.record_mut().unpack_to_map().expect("unpack succeeds");
                put(msg);
                map
            };
            for (name, value) in &parts {
                assert_eq!(expected.get(name).map(String::as_str), Some(value.render().as_str()));
            }
            assert!(
                expected.values().any(|value| value.contains(&marker)),
                "round marker must survive the round trip"
            );
        }
    }

    #[test]
    fn get_after_put_returns_pooled_message() {
        let mut msg = get();
        msg.set_origin(std::sync::Arc::from("still-tagged"));
        put(msg);
        // Whatever comes back, pooled or fresh, must be fully usable and
        // must not carry the previous use's origin marker.
        let mut next = get();
        assert_eq!(next.origin(), None);
        let mut parts = LogParts::from([(FORMER_MESSAGE_KEY, PartValue::Text("x".into()))]);
        next.record_mut()
            .pack(&mut parts, Some("bad"))
            .expect("pack succeeds");
        let map = next.record_mut().unpack_to_map().expect("unpack succeeds");
        assert_eq!(map[FORMER_MESSAGE_KEY], "x");
        put(next);
    }
}
