use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Credentials;

lazy_static! {
    static ref BITRATE: Regex = Regex::new(r"\d+(?:\.\d+)?kbits/s").unwrap();
}

/// Substrings that mark an encoder log as failed, matched case-insensitively.
const FAILURE_MARKERS: [&str; 3] = ["error", "failure", "not found"];

/// Printed by ffmpeg when a stop signal ended it, e.g. on `docker stop`.
const INTERRUPT_MARKER: &str = "received signal";

/// Encoder settings shared by the real and the test-pattern command.
const ENCODE_ARGS: [&str; 22] = [
    "-c:v",
    "libx264",
    "-b:v",
    "1600k",
    "-preset",
    "ultrafast",
    "-b",
    "900k",
    "-c:a",
    "libfdk_aac",
    "-b:a",
    "128k",
    "-s",
    "960x720",
    "-x264opts",
    "keyint=50",
    "-g",
    "25",
    "-pix_fmt",
    "yuv420p",
    "-f",
    "flv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Success,
    Failure,
    /// Stopped from outside before the input ran out.
    Interrupted,
}

/// Builds the argv for the encoder container.
pub struct EncoderCommand;

impl EncoderCommand {
    /// The RTMP target in the form librtmp expects: url followed by connect options.
    pub fn rtmp_target(credentials: &Credentials) -> String {
        format!(
            "{} flashver=FMLE/3.020(compatible;20FMSc/1.0) live=true pubUser={} pubPasswd={} playpath={}",
            credentials.rtmp_url, credentials.user, credentials.password, credentials.play_path
        )
    }

    /// Stream `input` (a path inside the container) in real time.
    pub fn stream(input: &str, credentials: &Credentials) -> Vec<String> {
        Self::build(&["-re", "-i", input], credentials)
    }

    /// Stream a synthetic test pattern, used to check the endpoint without a file.
    pub fn test_pattern(credentials: &Credentials) -> Vec<String> {
        Self::build(&["-re", "-f", "lavfi", "-i", "testsrc"], credentials)
    }

    fn build(input: &[&str], credentials: &Credentials) -> Vec<String> {
        std::iter::once("ffmpeg")
            .chain(input.iter().copied())
            .chain(ENCODE_ARGS)
            .map(str::to_string)
            .chain(std::iter::once(Self::rtmp_target(credentials)))
            .collect()
    }
}

/// Most recent bitrate token in a log tail, e.g. `920.3kbits/s`.
pub fn latest_bitrate(log: &[u8]) -> Option<String> {
    let log = String::from_utf8_lossy(log);
    BITRATE
        .find_iter(&log)
        .last()
        .map(|matched| matched.as_str().to_string())
}

/// Decide how a finished encoder went from its full log. Crude on purpose:
/// anything without a failure marker counts as success.
pub fn classify(log: &[u8]) -> StreamOutcome {
    let log = String::from_utf8_lossy(log).to_lowercase();
    if FAILURE_MARKERS.iter().any(|marker| log.contains(marker)) {
        StreamOutcome::Failure
    } else if log.contains(INTERRUPT_MARKER) {
        StreamOutcome::Interrupted
    } else {
        StreamOutcome::Success
    }
}
