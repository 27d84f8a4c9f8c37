//! Round-scoped slot tracking.
//!
//! A [`Window`] holds up to W packets, one per round-relative sequence
//! number, and one flag per slot. On the sender the flag means "acknowledged
//! by the peer"; on the receiver it means "acknowledgment sent". Slots only
//! move forward: empty → filled → flagged.

use std::io;

use udp_sr_abstract::{DataPacket, FileSource, PAYLOAD_CAPACITY};

/// What applying an ack or a packet did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    New,
    Duplicate,
    OutOfRange,
}

#[derive(Debug, Clone)]
pub struct Window {
    slots: Vec<Option<DataPacket>>,
    flags: Vec<bool>,
    /// Slots that take part in this round: sentinel position + 1, or W.
    effective: usize,
}

impl Window {
    /// An empty receive window of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            flags: vec![false; capacity],
            effective: capacity,
        }
    }

    /// Fill a send window from `source`.
    ///
    /// Reads up to `capacity` chunks of at most [`PAYLOAD_CAPACITY`] bytes.
    /// When the source runs dry the first unfilled slot becomes the EOF
    /// sentinel and the round shrinks to end there.
    pub fn build_round<S: FileSource + ?Sized>(source: &mut S, capacity: usize) -> io::Result<Self> {
        let mut window = Self::new(capacity);
        for seq in 0..capacity {
            let chunk = source.read_chunk(PAYLOAD_CAPACITY)?;
            if chunk.is_empty() {
                window.slots[seq] = Some(DataPacket::eof(seq as i32));
                window.effective = seq + 1;
                break;
            }
            let packet = DataPacket::new(seq as i32, chunk).map_err(io::Error::other)?;
            window.slots[seq] = Some(packet);
        }
        Ok(window)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn effective_len(&self) -> usize {
        self.effective
    }

    pub fn packet(&self, seq: usize) -> Option<&DataPacket> {
        self.slots.get(seq).and_then(Option::as_ref)
    }

    /// Filled slots of this round in ascending sequence order.
    pub fn packets(&self) -> impl Iterator<Item = &DataPacket> {
        self.slots[..self.effective].iter().flatten()
    }

    /// True once the EOF sentinel occupies a slot of this round.
    pub fn has_sentinel(&self) -> bool {
        self.packets().any(DataPacket::is_eof)
    }

    /// Payload bytes carried by the round, sentinel excluded.
    pub fn payload_bytes(&self) -> u64 {
        self.packets().map(|p| p.data().len() as u64).sum()
    }

    fn index(&self, seq: i32) -> Option<usize> {
        usize::try_from(seq).ok().filter(|&i| i < self.effective)
    }

    /// Flag a filled slot. Flagging twice changes nothing.
    pub fn record_ack(&mut self, seq: i32) -> SlotUpdate {
        let Some(i) = self.index(seq).filter(|&i| self.slots[i].is_some()) else {
            return SlotUpdate::OutOfRange;
        };
        if self.flags[i] {
            return SlotUpdate::Duplicate;
        }
        self.flags[i] = true;
        SlotUpdate::New
    }

    /// Put a received packet into its slot.
    ///
    /// A repeat delivery overwrites the stored payload. A sentinel ends the
    /// round at its own position; anything beyond that is out of range. If
    /// the sentinel's slot is overwritten with data the round grows back.
    pub fn store(&mut self, packet: DataPacket) -> SlotUpdate {
        let Some(i) = self.index(packet.seq) else {
            return SlotUpdate::OutOfRange;
        };
        let update = match self.slots[i].replace(packet) {
            Some(_) => SlotUpdate::Duplicate,
            None => SlotUpdate::New,
        };
        self.effective = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(DataPacket::is_eof))
            .map_or(self.capacity(), |i| i + 1);
        update
    }

    /// Slots holding exactly the packet that `previous` holds in the same
    /// position, ascending.
    pub fn repeats(&self, previous: &Window) -> Vec<i32> {
        (0..self.effective)
            .filter(|&i| self.slots[i].is_some() && self.slots[i].as_ref() == previous.packet(i))
            .map(|i| i as i32)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.flags[..self.effective].iter().all(|&f| f)
    }

    /// Unflagged slots of the round, ascending.
    pub fn missing(&self) -> Vec<i32> {
        (0..self.effective)
            .filter(|&i| !self.flags[i])
            .map(|i| i as i32)
            .collect()
    }

    /// Filled slots whose flag is still clear, ascending.
    pub fn unconfirmed(&self) -> Vec<i32> {
        (0..self.effective)
            .filter(|&i| self.slots[i].is_some() && !self.flags[i])
            .map(|i| i as i32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;

    fn data(seq: i32, byte: u8, len: usize) -> DataPacket {
        DataPacket::new(seq, Bytes::from(vec![byte; len])).unwrap()
    }

    #[test]
    fn sizing_for_1600_bytes() {
        let mut source = Cursor::new(vec![1u8; 1600]);
        let window = Window::build_round(&mut source, 5).unwrap();

        assert_eq!(window.effective_len(), 5);
        let lens: Vec<i32> = window.packets().map(|p| p.payload_len).collect();
        assert_eq!(lens, vec![500, 500, 500, 100, -1]);
        assert!(window.has_sentinel());
        assert_eq!(window.payload_bytes(), 1600);
    }

    #[test]
    fn exact_multiple_needs_sentinel_round() {
        let mut source = Cursor::new(vec![1u8; 2500]);
        let first = Window::build_round(&mut source, 5).unwrap();
        assert_eq!(first.effective_len(), 5);
        assert!(!first.has_sentinel());

        let second = Window::build_round(&mut source, 5).unwrap();
        assert_eq!(second.effective_len(), 1);
        assert!(second.packet(0).unwrap().is_eof());
    }

    #[test]
    fn empty_source_is_sentinel_only() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let window = Window::build_round(&mut source, 5).unwrap();
        assert_eq!(window.effective_len(), 1);
        assert_eq!(window.missing(), vec![0]);
    }

    #[test]
    fn ack_is_idempotent() {
        let mut source = Cursor::new(vec![0u8; 1000]);
        let mut window = Window::build_round(&mut source, 3).unwrap();
        assert_eq!(window.effective_len(), 3);

        assert_eq!(window.record_ack(0), SlotUpdate::New);
        assert_eq!(window.record_ack(1), SlotUpdate::New);
        assert!(!window.is_complete());
        assert_eq!(window.record_ack(1), SlotUpdate::Duplicate);
        assert!(!window.is_complete());

        assert_eq!(window.record_ack(2), SlotUpdate::New);
        assert!(window.is_complete());
        assert_eq!(window.record_ack(2), SlotUpdate::Duplicate);
        assert!(window.is_complete());
    }

    #[test]
    fn missing_is_selective() {
        let mut source = Cursor::new(vec![0u8; 1600]);
        let mut window = Window::build_round(&mut source, 5).unwrap();
        for seq in [0, 1, 3] {
            window.record_ack(seq);
        }
        assert_eq!(window.missing(), vec![2, 4]);
    }

    #[test]
    fn acks_outside_round_are_rejected() {
        let mut source = Cursor::new(vec![0u8; 100]);
        let mut window = Window::build_round(&mut source, 5).unwrap();
        assert_eq!(window.effective_len(), 2);
        assert_eq!(window.record_ack(2), SlotUpdate::OutOfRange);
        assert_eq!(window.record_ack(7), SlotUpdate::OutOfRange);
        assert_eq!(window.record_ack(-3), SlotUpdate::OutOfRange);
        assert_eq!(window.missing(), vec![0, 1]);
    }

    #[test]
    fn duplicate_store_overwrites_once() {
        let mut window = Window::new(5);
        assert_eq!(window.store(data(2, 9, 10)), SlotUpdate::New);
        assert_eq!(window.store(data(2, 9, 10)), SlotUpdate::Duplicate);
        assert_eq!(window.packets().count(), 1);
        assert_eq!(window.unconfirmed(), vec![2]);
    }

    #[test]
    fn out_of_range_store_leaves_slots_alone() {
        let mut window = Window::new(5);
        window.store(data(0, 1, 4));
        assert_eq!(window.store(data(5, 2, 4)), SlotUpdate::OutOfRange);
        assert_eq!(window.store(data(9, 2, 4)), SlotUpdate::OutOfRange);
        assert_eq!(window.packet(0).unwrap().data(), &[1, 1, 1, 1]);
        assert_eq!(window.packets().count(), 1);
    }

    #[test]
    fn sentinel_shrinks_receive_round() {
        let mut window = Window::new(5);
        window.store(data(1, 1, 500));
        window.store(DataPacket::eof(2));
        window.store(data(0, 1, 500));
        assert_eq!(window.effective_len(), 3);
        assert_eq!(window.store(data(3, 1, 10)), SlotUpdate::OutOfRange);

        for seq in window.unconfirmed() {
            window.record_ack(seq);
        }
        assert!(window.is_complete());
        assert_eq!(window.payload_bytes(), 1000);
    }

    #[test]
    fn replacing_the_sentinel_restores_the_round() {
        let mut window = Window::new(4);
        window.store(DataPacket::eof(1));
        assert_eq!(window.effective_len(), 2);

        assert_eq!(window.store(data(1, 7, 500)), SlotUpdate::Duplicate);
        assert_eq!(window.effective_len(), 4);
        assert!(!window.has_sentinel());
        assert_eq!(window.store(data(3, 7, 20)), SlotUpdate::New);
        assert_eq!(window.unconfirmed(), vec![1, 3]);
    }

    #[test]
    fn repeats_match_slot_and_payload() {
        let bytes = [vec![4u8; 1000], vec![5u8; 500], vec![4u8; 1000], vec![6u8; 500]].concat();
        let mut source = Cursor::new(bytes);
        let first = Window::build_round(&mut source, 3).unwrap();
        let second = Window::build_round(&mut source, 3).unwrap();
        assert_eq!(second.repeats(&first), vec![0, 1]);

        let tail = Window::build_round(&mut source, 3).unwrap();
        assert!(tail.has_sentinel());
        assert!(tail.repeats(&second).is_empty());
    }

    #[test]
    fn receive_round_waits_for_every_slot() {
        let mut window = Window::new(3);
        window.store(data(0, 1, 500));
        window.store(data(2, 1, 500));
        for seq in window.unconfirmed() {
            window.record_ack(seq);
        }
        assert!(!window.is_complete());
        assert_eq!(window.missing(), vec![1]);
        assert_eq!(window.record_ack(1), SlotUpdate::OutOfRange);
    }
}
