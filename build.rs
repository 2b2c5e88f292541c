// rust-embed embeds the listing templates at compile time, but Cargo's
// incremental compilation may not notice edits to them.

fn main() {
    println!("cargo:rerun-if-changed=templates/");
}
