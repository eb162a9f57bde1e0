use std::fs;
use std::io::Write;
use tempfile::TempDir;

use opsrag_core::chunker::TextSplitter;
use opsrag_core::data_processor::DataProcessor;
use opsrag_core::Error;

fn processor() -> DataProcessor {
    DataProcessor::new(TextSplitter::new(300, 30).unwrap())
}

#[test]
fn process_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let file_path = tmp.path().join("sample.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    write!(f, "Short text").unwrap();

    let chunks = processor().process(&file_path).expect("process");

    assert_eq!(chunks.len(), 1, "text shorter than a window becomes one chunk");
    assert_eq!(chunks[0].text, "Short text");
    assert_eq!(chunks[0].offset, Some(0));
}

#[test]
fn directory_corpus_is_read_in_path_order() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("b.txt"), "bravo").unwrap();
    fs::write(dir.join("a.txt"), "alpha").unwrap();
    fs::write(dir.join("nested/c.txt"), "charlie").unwrap();
    fs::write(dir.join("ignored.md"), "delta").unwrap();

    let text = processor().load_corpus(dir).expect("load");
    assert_eq!(text, "alpha\n\nbravo\n\ncharlie");
}

#[test]
fn missing_corpus_is_an_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = processor().process(&tmp.path().join("absent.txt")).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}

#[test]
fn empty_directory_is_a_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let err = processor().load_corpus(tmp.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "got {err:?}");
}
