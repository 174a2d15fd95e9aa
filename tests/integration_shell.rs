//! Shell command tests against an in-memory tar.gz archive.
//!
//! Run with: cargo test --test integration_shell

use std::io::{Cursor, Write};

use arkfs::shell::ShellState;
use arkfs::shell::commands::{Command, cat::CatCommand, cd::CdCommand, ls::LsCommand, stat::StatCommand};
use arkfs::{CacheLevel, CancellationToken, Executor, OpenOptions, SourceHandle};

/// Create a simple tar.gz archive with test files
fn create_test_targz() -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::Builder;

    let mut archive_data = Vec::new();
    {
        let encoder = GzEncoder::new(&mut archive_data, Compression::default());
        let mut tar = Builder::new(encoder);

        // Add a simple text file to the archive root
        let file_content = b"Content inside archive\n";
        let mut header = tar::Header::new_gnu();
        header.set_path("archive_file.txt").unwrap();
        header.set_size(file_content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append(&header, &file_content[..]).unwrap();

        // Add a directory
        let mut dir_header = tar::Header::new_gnu();
        dir_header.set_path("app/").unwrap();
        dir_header.set_size(0);
        dir_header.set_mode(0o755);
        dir_header.set_entry_type(tar::EntryType::Directory);
        dir_header.set_cksum();
        tar.append(&dir_header, &[][..]).unwrap();

        // Add a file inside the directory
        let nested_content = b"Nested file content\n";
        let mut nested_header = tar::Header::new_gnu();
        nested_header.set_path("app/nested.txt").unwrap();
        nested_header.set_size(nested_content.len() as u64);
        nested_header.set_mode(0o644);
        nested_header.set_cksum();
        tar.append(&nested_header, &nested_content[..]).unwrap();

        // A file whose parent directories have no headers
        let deep_content = b"deep\n";
        let mut deep_header = tar::Header::new_gnu();
        deep_header.set_path("implicit/inner/deep.txt").unwrap();
        deep_header.set_size(deep_content.len() as u64);
        deep_header.set_mode(0o644);
        deep_header.set_cksum();
        tar.append(&deep_header, &deep_content[..]).unwrap();

        // Symlink into the directory
        let mut link_header = tar::Header::new_gnu();
        link_header.set_path("shortcut").unwrap();
        link_header.set_link_name("app").unwrap();
        link_header.set_size(0);
        link_header.set_mode(0o777);
        link_header.set_entry_type(tar::EntryType::Symlink);
        link_header.set_cksum();
        tar.append(&link_header, &[][..]).unwrap();

        tar.finish().unwrap();
    }

    archive_data
}

fn create_test_shell(level: CacheLevel) -> ShellState {
    let source = SourceHandle::seekable(Cursor::new(create_test_targz()));
    let root = OpenOptions::new()
        .cache_level(level)
        .open(&source, &CancellationToken::new())
        .expect("Failed to open archive");
    ShellState::new(root, Executor::current())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_cd_command() {
    let mut shell = create_test_shell(CacheLevel::OnDemand);

    // Test: cd into directory
    let cd_cmd = CdCommand;
    cd_cmd
        .execute(&mut shell, &args(&["app"]))
        .await
        .expect("Failed to cd into app");
    assert_eq!(shell.current_path().to_string(), "/app");

    // Test: cd into a directory that only exists as a path prefix
    cd_cmd
        .execute(&mut shell, &args(&["/implicit/inner"]))
        .await
        .expect("Failed to cd into implicit directory");
    assert_eq!(shell.current_path().to_string(), "/implicit/inner");

    // Test: cd ..
    cd_cmd
        .execute(&mut shell, &args(&[".."]))
        .await
        .expect("Failed to cd to parent");
    assert_eq!(shell.current_path().to_string(), "/implicit");

    // Test: cd with no args goes to root
    cd_cmd.execute(&mut shell, &[]).await.expect("Failed to cd to root");
    assert!(shell.current().is_root());
    assert_eq!(shell.prompt(), "arkfs:/ $ ");
}

#[tokio::test]
async fn test_cd_rejects_files_and_missing_paths() {
    let mut shell = create_test_shell(CacheLevel::OnDemand);
    let cd_cmd = CdCommand;

    let result = cd_cmd.execute(&mut shell, &args(&["archive_file.txt"])).await;
    assert!(result.is_err(), "cd into a file should fail");

    let result = cd_cmd.execute(&mut shell, &args(&["nowhere"])).await;
    assert!(result.is_err(), "cd into a missing path should fail");
    assert!(shell.current().is_root());
}

#[tokio::test]
async fn test_cd_follows_symlink() {
    let mut shell = create_test_shell(CacheLevel::Full);

    CdCommand
        .execute(&mut shell, &args(&["shortcut"]))
        .await
        .expect("Failed to cd through symlink");
    assert_eq!(shell.current_path().to_string(), "/app");
}

#[tokio::test]
async fn test_cat_command() {
    for level in [CacheLevel::None, CacheLevel::OnDemand, CacheLevel::Full] {
        let mut shell = create_test_shell(level);

        // Test: cat a simple file
        let cat_cmd = CatCommand;
        let result = cat_cmd.execute(&mut shell, &args(&["archive_file.txt"])).await;
        assert!(result.is_ok(), "Failed to cat archive_file.txt at {level}");

        // Test: cat a nested file with absolute path
        let result = cat_cmd.execute(&mut shell, &args(&["/app/nested.txt"])).await;
        assert!(result.is_ok(), "Failed to cat nested file at {level}");

        // Test: cat a directory
        let result = cat_cmd.execute(&mut shell, &args(&["app"])).await;
        assert!(result.is_err(), "cat of a directory should fail at {level}");
    }
}

#[tokio::test]
async fn test_ls_and_stat_commands() {
    let mut shell = create_test_shell(CacheLevel::None);

    let ls_cmd = LsCommand;
    ls_cmd.execute(&mut shell, &[]).await.expect("Failed to ls root");
    ls_cmd
        .execute(&mut shell, &args(&["-l", "app"]))
        .await
        .expect("Failed to ls -l app");
    ls_cmd
        .execute(&mut shell, &args(&["*.txt"]))
        .await
        .expect("Failed to ls with wildcard");
    assert!(ls_cmd.execute(&mut shell, &args(&["missing"])).await.is_err());

    let stat_cmd = StatCommand;
    stat_cmd
        .execute(&mut shell, &args(&["app/nested.txt"]))
        .await
        .expect("Failed to stat file");
    stat_cmd
        .execute(&mut shell, &args(&["-L", "shortcut"]))
        .await
        .expect("Failed to stat symlink");
    assert!(stat_cmd.execute(&mut shell, &[]).await.is_err());
}

#[tokio::test]
async fn test_ls_through_symlink_to_directory() {
    let mut shell = create_test_shell(CacheLevel::OnDemand);

    let link = shell.resolve("shortcut").unwrap();
    let followed = arkfs::shell::follow_link(link).unwrap();
    assert_eq!(followed.path().unwrap().to_string(), "/app");

    LsCommand
        .execute(&mut shell, &args(&["shortcut"]))
        .await
        .expect("Failed to ls a link to a directory");
    LsCommand
        .execute(&mut shell, &args(&["-l", "shortcut"]))
        .await
        .expect("Failed to ls -l a link to a directory");
}

#[tokio::test]
async fn test_execute_builtins() {
    let mut shell = create_test_shell(CacheLevel::OnDemand);

    shell.execute("cd app").await.expect("Failed to run cd");
    shell.execute("pwd").await.expect("Failed to run pwd");
    assert_eq!(shell.current_path().to_string(), "/app");

    let err = shell.execute("exit").await.unwrap_err();
    assert_eq!(err.to_string(), "exit");
    assert!(shell.execute("frobnicate").await.is_err());
}

#[tokio::test]
async fn test_archive_file_on_disk() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&create_test_targz()).unwrap();
    tmp.flush().unwrap();

    let source = SourceHandle::open_file(tmp.path()).unwrap();
    let app = OpenOptions::new()
        .path("/app")
        .open(&source, &CancellationToken::new())
        .unwrap();
    let mut shell = ShellState::new(app, Executor::current());
    assert_eq!(shell.current_path().to_string(), "/app");

    CatCommand
        .execute(&mut shell, &args(&["nested.txt"]))
        .await
        .expect("Failed to cat from disk archive");
}
