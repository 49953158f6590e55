use anyhow::Context;
use demo_service::certs::{generate_dev_certificates_with_ou, DEFAULT_CLIENT_OU};
use std::path::PathBuf;

const USAGE: &str = "usage: gen-dev-cert <output-dir> [--client-ou=<ou>] [hostname...]";

fn main() -> anyhow::Result<()> {
    // Writes ca.crt, tls.crt, tls.key, client.crt and client.key, e.g.
    //   cargo run --bin gen-dev-cert -- ./certs localhost 127.0.0.1
    // then point server-cert/server-key (and ca-cert for mutual TLS) at them.
    // The client certificate's OU decides which routes it may call.
    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().context(USAGE)?);
    let mut client_ou = DEFAULT_CLIENT_OU.to_string();
    let mut hostnames = Vec::new();
    for arg in args {
        match arg.strip_prefix("--client-ou=") {
            Some(ou) if !ou.is_empty() => client_ou = ou.to_string(),
            Some(_) => anyhow::bail!(USAGE),
            None => hostnames.push(arg),
        }
    }
    if hostnames.is_empty() {
        hostnames = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    }

    let certs = generate_dev_certificates_with_ou(&hostnames, &client_ou)?;

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let files = [
        ("ca.crt", &certs.ca_cert_pem),
        ("tls.crt", &certs.server_cert_pem),
        ("tls.key", &certs.server_key_pem),
        ("client.crt", &certs.client_cert_pem),
        ("client.key", &certs.client_key_pem),
    ];
    for (name, contents) in files {
        let path = out_dir.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    Ok(())
}
