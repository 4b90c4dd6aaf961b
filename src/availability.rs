// Recognizes failures caused by an unreachable docker daemon

use crate::errors;

const UNAVAILABLE_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error while fetching server api version",
    "error during connect",
    "docker daemon is not running",
    "failed to connect to localhost port 2375",
    "failed to connect to localhost port 2376",
    "permission denied while trying to connect to the docker daemon socket",
    "dial unix /var/run/docker.sock",
    "open //./pipe/docker_engine",
];

/// True when any cause in the chain reports the daemon as unreachable
pub fn is_docker_unavailable(error: &(dyn std::error::Error + 'static)) -> bool {
    errors::chain(error).any(|cause| {
        let message = cause.to_string().to_lowercase();
        UNAVAILABLE_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    })
}

/// Message handed to the skip signal for an unrecoverable startup failure
pub fn skip_message(error: &(dyn std::error::Error + 'static)) -> String {
    let prefix = if is_docker_unavailable(error) {
        "Docker is unavailable for container test"
    } else {
        "Container startup issue"
    };
    format!("{}: {}", prefix, errors::describe_chain(error))
}
