use tracing::*;

// RFC 854 command bytes.
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

// Options we negotiate positively; everything else is refused.
const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;
const OPT_TTYPE: u8 = 24;

// Terminal-type subnegotiation verbs (RFC 1091).
const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Command(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// RFC 854/855 option negotiation as a byte-at-a-time state machine, so
/// sequences split across reads are handled.
///
/// Policy: we let the server echo and suppress go-ahead, we offer our
/// terminal type on request, and we refuse every other option. Responses
/// are deterministic in server-request order.
pub struct Negotiator {
    state: State,
    sub_buffer: Vec<u8>,
    terminal: String,
}

impl Negotiator {
    pub fn new(terminal: &str) -> Self {
        Self {
            state: State::Data,
            sub_buffer: Vec::new(),
            terminal: terminal.to_owned(),
        }
    }

    /// Separate `input` into application `data` and protocol `replies` that
    /// must be written back to the server.
    pub fn ingest(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            match self.state {
                State::Data => {
                    if byte == IAC {
                        self.state = State::Iac;
                    } else {
                        data.push(byte);
                    }
                }
                State::Iac => match byte {
                    IAC => {
                        // Escaped 0xFF data byte.
                        data.push(IAC);
                        self.state = State::Data;
                    }
                    WILL | WONT | DO | DONT => self.state = State::Command(byte),
                    SB => {
                        self.sub_buffer.clear();
                        self.state = State::Subnegotiation;
                    }
                    other => {
                        trace!(command = other, "ignoring telnet command");
                        self.state = State::Data;
                    }
                },
                State::Command(command) => {
                    self.respond(command, byte, replies);
                    self.state = State::Data;
                }
                State::Subnegotiation => {
                    if byte == IAC {
                        self.state = State::SubnegotiationIac;
                    } else {
                        self.sub_buffer.push(byte);
                    }
                }
                State::SubnegotiationIac => match byte {
                    SE => {
                        self.subnegotiate(replies);
                        self.state = State::Data;
                    }
                    IAC => {
                        self.sub_buffer.push(IAC);
                        self.state = State::Subnegotiation;
                    }
                    _ => self.state = State::Data,
                },
            }
        }
    }

    fn respond(&self, command: u8, option: u8, replies: &mut Vec<u8>) {
        let answer = match (command, option) {
            // The server will echo and suppress go-ahead: yes please.
            (WILL, OPT_ECHO) | (WILL, OPT_SGA) => DO,
            (WILL, _) => DONT,
            // Requests for us to enable an option: terminal type and
            // suppress-go-ahead only.
            (DO, OPT_TTYPE) | (DO, OPT_SGA) => WILL,
            (DO, _) => WONT,
            // Acknowledge retractions.
            (WONT, _) => DONT,
            (DONT, _) => WONT,
            _ => return,
        };
        replies.extend_from_slice(&[IAC, answer, option]);
    }

    fn subnegotiate(&self, replies: &mut Vec<u8>) {
        if self.sub_buffer.as_slice() == [OPT_TTYPE, TTYPE_SEND] {
            replies.extend_from_slice(&[IAC, SB, OPT_TTYPE, TTYPE_IS]);
            replies.extend_from_slice(self.terminal.as_bytes());
            replies.extend_from_slice(&[IAC, SE]);
        } else {
            trace!(subnegotiation = ?self.sub_buffer, "ignoring subnegotiation");
        }
    }
}

/// Double IAC bytes so binary-looking payloads survive the telnet framing.
pub(crate) fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}
