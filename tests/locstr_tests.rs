use indoc::indoc;
use locmerge::formats::{LocStrDirectory, LocStrFile, LocStrWriteBack};
use locmerge::index::CorpusReader;
use locmerge::progress::no_progress;
use locmerge::traits::Parser;
use locmerge::types::RawEntry;
use locmerge::{ApplyMode, ApplyOutcome, Capabilities, Correction, PassOptions, run_pass};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MENU: &str = indoc! {r#"
    <?xml version="1.0" encoding="utf-8"?>
    <LanguageData>
      <LocStr StringId="A1" StrOrigin="Hello" Str="" />
      <LocStr StringId="S1" StrOrigin="Save" Str="Sauvegarder" />
      <LocStr StringId="E1" StrOrigin="" Str="stale" />
    </LanguageData>
"#};

const QUEST: &str = indoc! {r#"
    <?xml version="1.0" encoding="utf-8"?>
    <LanguageData>
      <!-- chapter one -->
      <locstr stringid="Q1" strorigin="Bring me ten apples." str="가져와" />
      <LOCSTR STRINGID="Q2" STRORIGIN="Thank you&lt;br/&gt;traveler" STR="" />
    </LanguageData>
"#};

fn write(root: &Path, relpath: &str, content: &str) {
    let path = root.join(relpath);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn corpus_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "ui/menu.xml", MENU);
    write(dir.path(), "Dialog/quest.xml", QUEST);
    write(dir.path(), "Dialog/broken.xml", "<LanguageData><LocStr StringId=\"X");
    write(dir.path(), "ui/readme.txt", "not a string table");
    dir
}

#[test]
fn test_directory_lists_xml_files_sorted() {
    let dir = corpus_dir();
    let reader = LocStrDirectory::new(dir.path());
    let relpaths: Vec<String> = reader.files().unwrap().into_iter().map(|f| f.relpath).collect();
    assert_eq!(
        relpaths,
        vec!["Dialog/broken.xml", "Dialog/quest.xml", "ui/menu.xml"]
    );
}

#[test]
fn test_missing_directory_is_fatal() {
    let dir = TempDir::new().unwrap();
    let reader = LocStrDirectory::new(dir.path().join("nope"));
    let err = run_pass(
        &reader,
        &[],
        &PassOptions::default(),
        &Capabilities::default(),
        &mut no_progress,
    )
    .unwrap_err();
    assert!(matches!(err, locmerge::Error::InvalidCorpus(_)));
}

#[test]
fn test_attribute_names_are_case_insensitive() {
    let file = LocStrFile::from_str(QUEST).unwrap();
    assert_eq!(
        file.entries,
        vec![
            RawEntry::new("Q1", "Bring me ten apples.", "가져와"),
            RawEntry::new("Q2", "Thank you<br/>traveler", ""),
        ]
    );
}

#[test]
fn test_pass_over_directory_and_write_back() {
    let dir = corpus_dir();
    let reader = LocStrDirectory::new(dir.path());
    let corrections = vec![
        Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello"),
        Correction::new("Enregistrer").with_string_id("S1").with_str_origin("Save"),
        Correction::new("Apporte-moi dix pommes.")
            .with_string_id("Q1")
            .with_str_origin("Bring me ten apples."),
        Correction::new("Merci\nvoyageur")
            .with_string_id("Q2")
            .with_str_origin("Thank you<br/>traveler"),
    ];
    let pass = run_pass(
        &reader,
        &corrections,
        &PassOptions::default(),
        &Capabilities::default(),
        &mut no_progress,
    )
    .unwrap();

    assert_eq!(
        pass.outcomes(),
        vec![
            Some(ApplyOutcome::Updated),
            Some(ApplyOutcome::SkippedTranslated),
            Some(ApplyOutcome::Updated),
            Some(ApplyOutcome::Updated),
        ]
    );
    assert_eq!(pass.report.files_indexed, 2);
    assert_eq!(pass.report.warnings.len(), 1);
    assert!(pass.report.warnings[0].file.ends_with("broken.xml"));

    let mut writer = LocStrWriteBack::new();
    let files = pass.flush(&mut writer).unwrap();
    assert_eq!(files, 2);

    let menu = fs::read_to_string(dir.path().join("ui/menu.xml")).unwrap();
    assert!(menu.contains(r#"<LocStr StringId="A1" StrOrigin="Hello" Str="Bonjour"/>"#));
    assert!(menu.contains(r#"<LocStr StringId="S1" StrOrigin="Save" Str="Sauvegarder" />"#));
    // Cleared by the golden rule.
    assert!(menu.contains(r#"<LocStr StringId="E1" StrOrigin="" Str=""/>"#));

    let quest = LocStrFile::read_from(dir.path().join("Dialog/quest.xml")).unwrap();
    assert_eq!(quest.entries[0].str_value, "Apporte-moi dix pommes.");
    assert_eq!(quest.entries[1].str_value, "Merci<br/>voyageur");
    let raw = fs::read_to_string(dir.path().join("Dialog/quest.xml")).unwrap();
    assert!(raw.contains("<!-- chapter one -->"));
    assert!(raw.contains(r#"STR="Merci&lt;br/&gt;voyageur""#));
}

#[test]
fn test_second_pass_is_unchanged() {
    let dir = corpus_dir();
    let reader = LocStrDirectory::new(dir.path());
    let corrections =
        vec![Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello")];
    let options = PassOptions::new().with_mode(ApplyMode::Overwrite);

    let first = run_pass(&reader, &corrections, &options, &Capabilities::default(), &mut no_progress)
        .unwrap();
    first.flush(&mut LocStrWriteBack::new()).unwrap();

    let second = run_pass(&reader, &corrections, &options, &Capabilities::default(), &mut no_progress)
        .unwrap();
    assert_eq!(second.outcomes(), vec![Some(ApplyOutcome::Unchanged)]);
    assert!(second.store.changed().next().is_none());
}

#[test]
fn test_utf16_table_is_decoded() {
    let dir = TempDir::new().unwrap();
    let mut bytes = vec![0xFF, 0xFE];
    for unit in r#"<LanguageData><LocStr StringId="K1" StrOrigin="Quit" Str="종료"/></LanguageData>"#
        .encode_utf16()
    {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let path = dir.path().join("utf16.xml");
    fs::write(&path, bytes).unwrap();

    let file = LocStrFile::read_from(&path).unwrap();
    assert_eq!(file.entries, vec![RawEntry::new("K1", "Quit", "종료")]);
}

#[test]
fn test_write_back_refuses_changed_file() {
    let dir = corpus_dir();
    let reader = LocStrDirectory::new(dir.path());
    let corrections =
        vec![Correction::new("Bonjour").with_string_id("A1").with_str_origin("Hello")];
    let pass = run_pass(
        &reader,
        &corrections,
        &PassOptions::default(),
        &Capabilities::default(),
        &mut no_progress,
    )
    .unwrap();

    // Someone reordered the file after it was indexed.
    write(
        dir.path(),
        "ui/menu.xml",
        r#"<LanguageData><LocStr StringId="S1" StrOrigin="Save" Str=""/><LocStr StringId="A1" StrOrigin="Hello" Str=""/></LanguageData>"#,
    );
    let err = pass.flush(&mut LocStrWriteBack::new()).unwrap_err();
    assert!(matches!(err, locmerge::Error::WriteBack { .. }));
}

#[test]
fn test_utf16_table_is_written_back_as_utf8() {
    let dir = TempDir::new().unwrap();
    let mut bytes = vec![0xFF, 0xFE];
    let table = r#"<?xml version="1.0" encoding="utf-16"?><LanguageData><LocStr StringId="K1" StrOrigin="Quit" Str=""/></LanguageData>"#;
    for unit in table.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(dir.path().join("menu.xml"), bytes).unwrap();

    let reader = LocStrDirectory::new(dir.path());
    let corrections = vec![Correction::new("Quitter").with_string_id("K1").with_str_origin("Quit")];
    let pass = run_pass(
        &reader,
        &corrections,
        &PassOptions::default(),
        &Capabilities::default(),
        &mut no_progress,
    )
    .unwrap();
    pass.flush(&mut LocStrWriteBack::new()).unwrap();

    let raw = fs::read_to_string(dir.path().join("menu.xml")).unwrap();
    assert!(raw.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
    assert!(raw.contains(r#"<LocStr StringId="K1" StrOrigin="Quit" Str="Quitter"/>"#));
}
