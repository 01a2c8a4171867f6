use std::net::IpAddr;
use uuid::Uuid;

use crate::models::{ProbeOutcome, Target};

/// Builds one SIP OPTIONS request for `target`. Call-ID, branch and tag are
/// freshly generated on every call; reusing them across probes would let
/// intermediary SIP infrastructure conflate unrelated transactions.
pub fn build_options_request(target: &Target, user_agent: &str) -> Vec<u8> {
    let call_id = Uuid::new_v4().to_string();
    let branch = format!("z9hG4bK{}", short_id());
    let tag = short_id();

    let message = format!(
        "OPTIONS sip:monitor@{target_ip}:{target_port} SIP/2.0\r\n\
         Via: SIP/2.0/UDP {source_ip}:{source_port};branch={branch};rport\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:monitor@{source_ip}:{source_port}>;tag={tag}\r\n\
         To: <sip:monitor@{target_ip}:{target_port}>\r\n\
         Contact: <sip:monitor@{source_ip}:{source_port}>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 OPTIONS\r\n\
         User-Agent: {user_agent}\r\n\
         Accept: application/sdp\r\n\
         Content-Length: 0\r\n\
         \r\n",
        target_ip = target.address,
        target_port = target.port,
        source_ip = target.source_ip,
        source_port = target.source_port,
    );
    message.into_bytes()
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Classifies a received datagram. A response is only trusted when it comes
/// from the probed address itself and its status line is a 200 OK; everything
/// else, including undecodable or empty payloads, counts as unreachable.
pub fn classify_response(payload: &[u8], from: IpAddr, expected: IpAddr) -> ProbeOutcome {
    if from != expected {
        return ProbeOutcome::Unreachable;
    }
    let text = String::from_utf8_lossy(payload);
    let status_line = text.lines().next().unwrap_or("");
    if status_line.contains("SIP/2.0 200 OK") {
        ProbeOutcome::Reachable
    } else {
        ProbeOutcome::Unreachable
    }
}
