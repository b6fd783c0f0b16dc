fn main() {
    println!("cargo::rustc-check-cfg=cfg(aarch64)");
    println!("cargo::rustc-check-cfg=cfg(x86_64)");

    // The descriptor tables follow the target, which is not always the host.
    match std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() {
        Ok("aarch64") => println!("cargo::rustc-cfg=aarch64"),
        Ok("x86_64") => println!("cargo::rustc-cfg=x86_64"),
        Ok(other) => println!("cargo::warning=no syscall table for {other}"),
        Err(_) => println!("cargo::warning=CARGO_CFG_TARGET_ARCH is not set"),
    }
}
