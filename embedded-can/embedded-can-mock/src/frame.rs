use embedded_can::{Frame as EmbeddedFrame, Id};

const MAX_DLC: usize = 64;

/// A CAN (or CAN FD sized) frame carried by the in-memory bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockFrame {
    id: Id,
    data: [u8; MAX_DLC],
    dlc: u8,
    remote: bool,
}

impl MockFrame {
    /// Convenience constructor for an 11-bit identifier.
    ///
    /// Returns `None` for identifiers above `0x7FF` or payloads above 64 bytes.
    pub fn standard(id: u16, data: &[u8]) -> Option<Self> {
        let id = embedded_can::StandardId::new(id)?;
        <Self as EmbeddedFrame>::new(id, data)
    }

    /// Convenience constructor for a 29-bit identifier.
    pub fn extended(id: u32, data: &[u8]) -> Option<Self> {
        let id = embedded_can::ExtendedId::new(id)?;
        <Self as EmbeddedFrame>::new(id, data)
    }
}

impl EmbeddedFrame for MockFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }
        let mut buf = [0u8; MAX_DLC];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: buf,
            dlc: data.len() as u8,
            remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }
        Some(Self {
            id: id.into(),
            data: [0u8; MAX_DLC],
            dlc: dlc as u8,
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }
}
