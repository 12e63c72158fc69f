fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=secrets.local.rs");
    emit_local_secrets();

    // Only the device build links against ESP-IDF; host builds run the tests.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}

/// Bake the factory-default credentials from an untracked `secrets.local.rs`.
fn emit_local_secrets() {
    let path = std::path::Path::new("secrets.local.rs");
    let Ok(src) = std::fs::read_to_string(path) else {
        return;
    };

    for (name, env) in [
        ("WIFI_SSID", "LOCAL_WIFI_SSID"),
        ("WIFI_PASS", "LOCAL_WIFI_PASS"),
        ("WEATHER_API_KEY", "LOCAL_WEATHER_API_KEY"),
        ("WEATHER_CITY", "LOCAL_WEATHER_CITY"),
    ] {
        if let Some(v) = extract_rust_str_const(&src, name) {
            println!("cargo:rustc-env={}={}", env, v);
        }
    }
}

fn extract_rust_str_const(src: &str, name: &str) -> Option<String> {
    for line in src.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") {
            continue;
        }
        let needle = format!("pub const {}:", name);
        if !trimmed.starts_with(&needle) {
            continue;
        }
        let start = trimmed.find('"')?;
        let end = trimmed[start + 1..].find('"')? + start + 1;
        return Some(trimmed[start + 1..end].to_string());
    }
    None
}
