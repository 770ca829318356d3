//! Shell stand-in for gpg: "encrypts" by prefixing the passphrase and
//! refuses to decrypt with any other passphrase.

use std::path::{Path, PathBuf};

const FAKE_GPG: &str = r#"#!/bin/sh
out=""; mode=""; pf=""; in=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2;;
    --passphrase-file) pf="$2"; shift 2;;
    --pinentry-mode|--cipher-algo) shift 2;;
    --symmetric) mode=enc; shift;;
    --decrypt) mode=dec; shift;;
    --*) shift;;
    *) in="$1"; shift;;
  esac
done
key=$(cat "$pf") || exit 2
if [ "$mode" = enc ]; then
  { printf 'FAKEGPG:%s\n' "$key"; cat "$in"; } > "$out"
else
  [ "$(head -n 1 "$in")" = "FAKEGPG:$key" ] || { echo "decryption failed: bad key" >&2; exit 2; }
  tail -n +2 "$in" > "$out"
fi
"#;

pub fn install(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-gpg");
    std::fs::write(&path, FAKE_GPG).expect("Failed to write fake gpg");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to mark fake gpg executable");
    path
}
