mod control;
mod protocol;
mod punch;
mod transport;

pub use control::ControlChannel;
pub use protocol::{
    CONTROL_FRAME_LIMIT, CONTROL_PEER_JOINED, CONTROL_PEER_LEFT, CONTROL_ROOM_CREATED,
    CONTROL_YOU_ARE, ClientHandle, ControlEvent, PUNCH_FOUND_PEER, PUNCH_REQUEST_LEN,
    PUNCH_WAITING, PeerEndpoint, PunchReply, RoomId, punch_request,
};
pub use punch::{PunchAttempt, PunchStatus};
pub use transport::{
    DatagramSocket, IDEAL_MAX_DATAGRAM_SIZE, RECV_BUFFER_SIZE, SendReport, TransportStats,
};
