//! Multi-packet message reassembly.
//!
//! Each session owns one `Reassembler`; no cross-session locking is
//! involved. Fragments are grouped by original message id, slotted by
//! their 1-based wire index, and stitched back together once every slot
//! is filled. Incomplete groups are evicted after a timeout because
//! terminals abandon retransmissions freely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use roadlink_proto::{Header, Packet, ProtocolError};

use crate::error::CoreError;

/// Default eviction timeout for incomplete groups.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Group {
    total: u16,
    slots: Vec<Option<Bytes>>,
    filled: usize,
    created_at: Instant,
}

/// Per-session fragment reassembler.
#[derive(Debug)]
pub struct Reassembler {
    groups: HashMap<u16, Group>,
    timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Reassembler {
    /// Create a reassembler with the given eviction timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { groups: HashMap::new(), timeout }
    }

    /// Insert one fragment.
    ///
    /// Returns the reassembled message once all slots are filled: the
    /// header is rewritten with the fragmentation bit cleared and the body
    /// is the concatenation in index order. Duplicate indices overwrite
    /// (terminals retry); a fresh total for the same message id restarts
    /// the group.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidFragment`] via [`CoreError::Protocol`] when
    /// the index is 0 or above the declared total.
    pub fn insert(
        &mut self,
        header: &Header,
        body: Bytes,
        now: Instant,
    ) -> Result<Option<Packet>, CoreError> {
        let frag = header
            .fragment
            .ok_or(CoreError::Protocol(ProtocolError::InvalidHeader(
                "fragment bit set without a fragmentation tuple",
            )))?;

        if frag.index == 0 || frag.index > frag.total || frag.total == 0 {
            return Err(CoreError::Protocol(ProtocolError::InvalidFragment {
                index: frag.index,
                total: frag.total,
            }));
        }

        let group = self
            .groups
            .entry(header.msg_id)
            .and_modify(|g| {
                if g.total != frag.total {
                    // The terminal restarted the transfer with a new split.
                    *g = Group {
                        total: frag.total,
                        slots: vec![None; frag.total as usize],
                        filled: 0,
                        created_at: now,
                    };
                }
            })
            .or_insert_with(|| Group {
                total: frag.total,
                slots: vec![None; frag.total as usize],
                filled: 0,
                created_at: now,
            });

        let slot = &mut group.slots[(frag.index - 1) as usize];
        if slot.is_none() {
            group.filled += 1;
        }
        *slot = Some(body);

        if group.filled < group.total as usize {
            return Ok(None);
        }

        let group = self
            .groups
            .remove(&header.msg_id)
            .ok_or(CoreError::Protocol(ProtocolError::InvalidHeader("fragment group vanished")))?;

        let mut body = BytesMut::new();
        for slot in group.slots.into_iter().flatten() {
            body.extend_from_slice(&slot);
        }

        let mut header = header.clone();
        header.fragment = None;
        header.attr.fragmented = false;
        header.attr.body_length = body.len() as u16;
        Ok(Some(Packet::new(header, body.freeze())))
    }

    /// Evict groups older than the timeout, returning one error per group
    /// for the caller to log. No reply is sent for evicted groups.
    pub fn sweep(&mut self, now: Instant) -> Vec<CoreError> {
        let timeout = self.timeout;
        let expired: Vec<u16> = self
            .groups
            .iter()
            .filter(|(_, g)| now.duration_since(g.created_at) >= timeout)
            .map(|(&msg_id, _)| msg_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|msg_id| {
                self.groups.remove(&msg_id).map(|g| CoreError::FragmentTimeout {
                    msg_id,
                    missing: g.total as usize - g.filled,
                })
            })
            .collect()
    }

    /// Number of groups still awaiting fragments.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use roadlink_proto::{Fragment, Version};

    use super::*;

    fn frag_header(msg_id: u16, total: u16, index: u16) -> Header {
        let mut header = Header::new(Version::V2013, "013900000001", msg_id, index);
        header.fragment = Some(Fragment { total, index });
        header.attr.fragmented = true;
        header
    }

    #[test]
    fn in_order_completion() {
        let mut r = Reassembler::default();
        let now = Instant::now();

        let first = r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"AB"), now).unwrap();
        assert!(first.is_none());
        assert_eq!(r.pending(), 1);

        let done = r
            .insert(&frag_header(0x0200, 2, 2), Bytes::from_static(b"CD"), now)
            .unwrap()
            .expect("second fragment completes the group");
        assert_eq!(done.body.as_ref(), b"ABCD");
        assert!(done.header.fragment.is_none());
        assert!(!done.header.attr.fragmented);
        assert_eq!(done.header.attr.body_length, 4);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn out_of_order_completion() {
        let mut r = Reassembler::default();
        let now = Instant::now();

        assert!(r.insert(&frag_header(0x0200, 2, 2), Bytes::from_static(b"CD"), now).unwrap().is_none());
        let done = r
            .insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"AB"), now)
            .unwrap()
            .expect("group completes regardless of arrival order");
        assert_eq!(done.body.as_ref(), b"ABCD");
    }

    #[test]
    fn duplicate_index_overwrites() {
        let mut r = Reassembler::default();
        let now = Instant::now();

        assert!(r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"xx"), now).unwrap().is_none());
        assert!(r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"AB"), now).unwrap().is_none());
        let done = r
            .insert(&frag_header(0x0200, 2, 2), Bytes::from_static(b"CD"), now)
            .unwrap()
            .expect("retry then completion");
        assert_eq!(done.body.as_ref(), b"ABCD");
    }

    #[test]
    fn index_zero_is_invalid() {
        let mut r = Reassembler::default();
        let err = r.insert(&frag_header(0x0200, 2, 0), Bytes::new(), Instant::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Protocol(ProtocolError::InvalidFragment { index: 0, total: 2 })
        ));
    }

    #[test]
    fn index_above_total_is_invalid() {
        let mut r = Reassembler::default();
        let err = r.insert(&frag_header(0x0200, 2, 3), Bytes::new(), Instant::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Protocol(ProtocolError::InvalidFragment { index: 3, total: 2 })
        ));
    }

    #[test]
    fn changed_total_restarts_the_group() {
        let mut r = Reassembler::default();
        let now = Instant::now();

        assert!(r.insert(&frag_header(0x0200, 3, 1), Bytes::from_static(b"AB"), now).unwrap().is_none());
        assert!(r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"EF"), now).unwrap().is_none());
        let done = r
            .insert(&frag_header(0x0200, 2, 2), Bytes::from_static(b"GH"), now)
            .unwrap()
            .expect("restarted group completes under the new total");
        assert_eq!(done.body.as_ref(), b"EFGH");
    }

    #[test]
    fn sweep_evicts_expired_groups() {
        let mut r = Reassembler::new(Duration::from_secs(60));
        let start = Instant::now();

        r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"AB"), start).unwrap();
        assert!(r.sweep(start + Duration::from_secs(30)).is_empty());

        let evicted = r.sweep(start + Duration::from_secs(61));
        assert_eq!(evicted.len(), 1);
        assert!(matches!(
            evicted[0],
            CoreError::FragmentTimeout { msg_id: 0x0200, missing: 1 }
        ));
        assert_eq!(r.pending(), 0);
    }

    fn arb_arrival_order() -> impl Strategy<Value = Vec<u16>> {
        (2u16..=8).prop_flat_map(|total| Just((1..=total).collect::<Vec<_>>()).prop_shuffle())
    }

    proptest! {
        #[test]
        fn any_arrival_order_reassembles_in_index_order(order in arb_arrival_order()) {
            let total = order.len() as u16;

            let mut r = Reassembler::default();
            let now = Instant::now();
            let mut done = None;

            for index in order {
                let body = Bytes::from(vec![index as u8; 2]);
                if let Some(packet) =
                    r.insert(&frag_header(0x0200, total, index), body, now).unwrap()
                {
                    done = Some(packet);
                }
            }

            let packet = done.expect("all indices delivered");
            let expected: Vec<u8> =
                (1..=total as u8).flat_map(|i| [i, i]).collect();
            prop_assert_eq!(packet.body.as_ref(), &expected[..]);
        }
    }

    #[test]
    fn groups_for_different_msg_ids_are_independent() {
        let mut r = Reassembler::default();
        let now = Instant::now();

        r.insert(&frag_header(0x0200, 2, 1), Bytes::from_static(b"AB"), now).unwrap();
        r.insert(&frag_header(0x0704, 2, 1), Bytes::from_static(b"12"), now).unwrap();
        assert_eq!(r.pending(), 2);

        let done = r
            .insert(&frag_header(0x0200, 2, 2), Bytes::from_static(b"CD"), now)
            .unwrap()
            .expect("only the 0x0200 group completes");
        assert_eq!(done.body.as_ref(), b"ABCD");
        assert_eq!(r.pending(), 1);
    }
}
