//! Embedded shell payloads executed inside the target container.
//!
//! Every probe here sticks to the process-information pseudo-filesystem and
//! plain `sh`: a dedicated process or network tool may be absent from minimal
//! images, but `/proc` is always present. The attach and relaunch payloads
//! print [`READY_MARKER`] once the debug port shows up in `/proc/net/tcp`,
//! which is the launch-readiness signal the session tunnel waits for before
//! requesting the port-forward.

/// Line printed by the launch scripts once the debugger is accepting
/// connections. The session tunnel treats this as the launch-readiness
/// signal.
pub const READY_MARKER: &str = "podtap: debugger listening";

/// Shared helpers: locate dlv and wait for a port to reach the LISTEN state
/// by scanning `/proc/net/tcp{,6}`.
const PRELUDE: &str = r#"if [ -z "$GOPATH" ]; then
    export GOPATH=/go
fi
dlv_bin() {
    which dlv 2>/dev/null || echo "$GOPATH/bin/dlv"
}
port_listening() {
    hexport=$(printf '%04X' "$1")
    grep -qi ":$hexport 00000000:0000 0A\|:$hexport 00000000000000000000000000000000:0000 0A" /proc/net/tcp /proc/net/tcp6 2>/dev/null
}
wait_listen() {
    while ! port_listening "$1"; do
        sleep 1
    done
    echo "podtap: debugger listening"
}"#;

/// Idempotent delve toolchain install. Run to completion before any launch
/// command is issued.
pub const INSTALL_DEBUGGER: &str = r#"#!/bin/sh
check() {
    which "$1" >/dev/null 2>&1
}
if [ -z "$GOPATH" ]; then
    export GOPATH=/go
fi
if check dlv || [ -f "$GOPATH/bin/dlv" ]; then
    echo "podtap: debugger already installed"
else
    if ! check git || ! check wget; then
        if check apk; then
            apk add --no-cache git
        elif check apt-get; then
            apt-get update && apt-get install -y git wget
        elif check dnf; then
            dnf -y install git wget
        elif check yum; then
            yum update && yum install -y git wget
        else
            echo "podtap: no usable package manager" >&2
            exit 1
        fi
    fi
    if ! check go; then
        if check apk; then
            # Alpine needs its own go build; the upstream linux binaries do not run on musl.
            apk update && apk add --no-cache go
        else
            if [ ! -f /usr/lib/go/bin/go ]; then
                wget -qO - https://dl.google.com/go/go1.22.5.linux-amd64.tar.gz | tar -xz -C /usr/lib
            fi
            if [ ! -f /bin/go ]; then
                ln -s /usr/lib/go/bin/go /bin/go
            fi
        fi
        go version
    fi
    go install github.com/go-delve/delve/cmd/dlv@latest
    echo "podtap: debugger installed"
fi
"#;

/// Attach the debugger to an existing pid: `attach.sh <port> <pid>`.
const ATTACH_BODY: &str = r#"port=$1
pid=$2
if port_listening "$port"; then
    echo "podtap: debugger already attached"
else
    "$(dlv_bin)" --headless --listen=:"$port" --api-version=2 --accept-multiclient attach "$pid" </dev/null >/dev/null 2>&1 &
fi
wait_listen "$port"
"#;

/// Terminate an existing pid and relaunch its command line under the
/// debugger: `relaunch.sh <port> <pid> <argv...>`.
const RELAUNCH_BODY: &str = r#"port=$1
pid=$2
shift 2
if port_listening "$port"; then
    echo "podtap: debugger already attached"
else
    kill "$pid" 2>/dev/null
    "$(dlv_bin)" --headless --listen=:"$port" --api-version=2 --accept-multiclient exec "$@" </dev/null >/dev/null 2>&1 &
fi
wait_listen "$port"
"#;

/// Container entrypoint injected by the admission webhook:
/// `podtap-entrypoint.sh <port> <argv...>`. The debugger runs in the
/// foreground so the container stays up for the lifetime of the session.
const ENTRYPOINT_BODY: &str = r#"port=$1
shift
echo "podtap: starting under debugger: $*"
exec "$(dlv_bin)" --headless --listen=:"$port" --api-version=2 --accept-multiclient exec "$@"
"#;

/// Full text of the attach payload.
#[must_use]
pub fn attach_script() -> String {
    format!("#!/bin/sh\n{PRELUDE}\n{ATTACH_BODY}")
}

/// Full text of the relaunch payload.
#[must_use]
pub fn relaunch_script() -> String {
    format!("#!/bin/sh\n{PRELUDE}\n{RELAUNCH_BODY}")
}

/// Full text of the webhook-injected entrypoint: the idempotent install
/// followed by a foreground `dlv exec` of the original command line.
#[must_use]
pub fn entrypoint_script() -> String {
    let install = INSTALL_DEBUGGER
        .strip_prefix("#!/bin/sh\n")
        .unwrap_or(INSTALL_DEBUGGER);
    format!("#!/bin/sh\n{install}\n{PRELUDE}\n{ENTRYPOINT_BODY}")
}
