use vergen_gitcl::{Emitter, GitclBuilder};

fn main() {
    // The describe string becomes PROGRAM_VERSION. Outside of a git checkout vergen emits its
    // placeholder value instead of failing the build.
    let gitcl = GitclBuilder::default()
        .describe(true, true, None)
        .build()
        .unwrap();
    Emitter::default()
        .add_instructions(&gitcl)
        .unwrap()
        .emit()
        .unwrap();

    // Source edits also need to retrigger the describe step so the dirty marker stays current
    for path in ["Cargo.toml", "build.rs", "src"] {
        println!("cargo:rerun-if-changed={path}");
    }
}
