use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use warcmap_core::{FormatRegistry, SortedStore, WarcMapError, WarcRecord, WarcVersion};
use warcmap_ingest::{AttemptHook, ErrorPolicy, Pipeline, PipelineConfig, Split};

fn date(version: WarcVersion) -> String {
    match version {
        WarcVersion::V018 => "2009-03-25T08:43:19-0800".to_string(),
        WarcVersion::V10 => "2012-02-10T21:51:20Z".to_string(),
    }
}

fn response(version: WarcVersion, id: &str, body: &[u8]) -> WarcRecord {
    WarcRecord::new(
        version,
        vec![
            ("WARC-Type".into(), "response".into()),
            ("WARC-Target-URI".into(), format!("http://example.org/{id}")),
            ("WARC-Date".into(), date(version)),
            ("WARC-TREC-ID".into(), id.into()),
            ("WARC-Record-ID".into(), format!("<urn:uuid:{id}>")),
            ("Content-Type".into(), "application/http; msgtype=response".into()),
        ],
        body.to_vec(),
    )
}

fn warcinfo(version: WarcVersion) -> WarcRecord {
    WarcRecord::new(
        version,
        vec![
            ("WARC-Type".into(), "warcinfo".into()),
            ("WARC-Date".into(), date(version)),
            ("WARC-Record-ID".into(), "<urn:uuid:info>".into()),
        ],
        b"software: crawler\r\n".to_vec(),
    )
}

/// Writes `files` corpus files with `per_file` responses each, ids shuffled
/// across files. Returns every response written.
fn random_corpus(dir: &Path, version: WarcVersion, files: usize, per_file: usize, seed: u64) -> Vec<WarcRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ids: Vec<usize> = (0..files * per_file).collect();
    for i in (1..ids.len()).rev() {
        ids.swap(i, rng.random_range(0..=i));
    }
    fs::create_dir_all(dir).unwrap();
    let mut all = Vec::new();
    for f in 0..files {
        let mut buf = Vec::new();
        warcinfo(version).write_framed(&mut buf);
        for n in &ids[f * per_file..(f + 1) * per_file] {
            let id = format!("clueweb-{n:06}");
            let len = rng.random_range(0..400);
            let mut body = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n".to_vec();
            body.extend((0..len).map(|_| rng.random_range(b' '..=b'~')));
            let r = response(version, &id, &body);
            r.write_framed(&mut buf);
            all.push(r);
        }
        fs::write(dir.join(format!("part-{f:02}.warc")), buf).unwrap();
    }
    all
}

fn store_files(dir: &Path) -> Vec<Vec<u8>> {
    ["data", "index", "manifest.json"].iter().map(|f| fs::read(dir.join(f)).unwrap()).collect()
}

#[test]
fn keys_are_prefixed_ids_in_order_and_round_trip() {
    for (format, version) in [("clueweb09", WarcVersion::V018), ("clueweb12", WarcVersion::V10)] {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("corpus");
        let records = random_corpus(&input, version, 4, 60, 7);
        let out = tmp.path().join("store");

        let cfg = PipelineConfig::new("ns-", &input, format, &out)
            .workers(3)
            .index_interval(16)
            .validate_dates(true);
        let report = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
        assert_eq!(report.entries, 240);
        assert_eq!(report.filtered, 4); // one warcinfo per file
        assert_eq!(report.skipped, 0);

        let store = SortedStore::open(&out).unwrap();
        let keys: Vec<String> = store.iter().map(|e| e.unwrap().0.to_string()).collect();
        let expected: BTreeSet<String> =
            records.iter().map(|r| format!("ns-{}", r.header("WARC-TREC-ID").unwrap())).collect();
        assert_eq!(keys.len(), expected.len());
        assert!(keys.windows(2).all(|w| w[0].as_bytes() < w[1].as_bytes()));
        assert_eq!(keys.iter().cloned().collect::<BTreeSet<_>>(), expected);

        for r in &records {
            let key = format!("ns-{}", r.header("WARC-TREC-ID").unwrap());
            let back = store.get_record(&key).unwrap().unwrap();
            assert_eq!(back.headers, r.headers);
            assert_eq!(back.body, r.body);
            assert_eq!(back.version, version);
        }
        assert!(store.verify().is_ok());
    }
}

#[test]
fn corpus_a_example() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("in");
    fs::create_dir_all(&input).unwrap();
    // doc-2 in the first file, doc-1 in the second
    let mut a = Vec::new();
    response(WarcVersion::V10, "urn:doc-2", b"two").write_framed(&mut a);
    fs::write(input.join("00.warc"), a).unwrap();
    let mut b = Vec::new();
    response(WarcVersion::V10, "urn:doc-1", b"one").write_framed(&mut b);
    fs::write(input.join("01.warc"), b).unwrap();

    for workers in [1, 2] {
        let out = tmp.path().join(format!("out-{workers}"));
        let cfg = PipelineConfig::new("corpusA-", &input, "clueweb12", &out).workers(workers);
        Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
        let store = SortedStore::open(&out).unwrap();
        let keys: Vec<String> = store.iter().map(|e| e.unwrap().0.to_string()).collect();
        assert_eq!(keys, vec!["corpusA-urn:doc-1", "corpusA-urn:doc-2"]);
        assert_eq!(store.get_record("corpusA-urn:doc-1").unwrap().unwrap().body, b"one");
    }
}

#[test]
fn unknown_format_creates_nothing() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("in");
    random_corpus(&input, WarcVersion::V10, 1, 2, 1);
    let out = tmp.path().join("out");
    let cfg = PipelineConfig::new("p-", &input, "unknown-format", &out);
    let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
    match &err {
        WarcMapError::UnsupportedFormat { name, valid } => {
            assert_eq!(name, "unknown-format");
            assert_eq!(valid, &vec!["clueweb09".to_string(), "clueweb12".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains("clueweb09, clueweb12"));
    assert!(!out.exists());
}

fn corpus_with_bad_length(path: &Path) {
    let mut buf = Vec::new();
    response(WarcVersion::V10, "ok-1", b"first body").write_framed(&mut buf);
    let mut bad = response(WarcVersion::V10, "bad", b"declared body").to_canonical_bytes();
    bad.truncate(bad.len() - 4);
    buf.extend_from_slice(&bad);
    buf.extend_from_slice(b"\r\n\r\n");
    response(WarcVersion::V10, "ok-2", b"second body").write_framed(&mut buf);
    fs::write(path, buf).unwrap();
}

#[test]
fn content_length_mismatch_skip_vs_abort() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("c.warc");
    corpus_with_bad_length(&input);

    let out = tmp.path().join("skip");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out).on_malformed(ErrorPolicy::Skip);
    let report = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.entries, 2);
    let store = SortedStore::open(&out).unwrap();
    assert!(store.get("p-ok-1").unwrap().is_some());
    assert!(store.get("p-ok-2").unwrap().is_some());
    assert!(store.get("p-bad").unwrap().is_none());
    assert_eq!(store.manifest().skipped_records, 1);

    let out = tmp.path().join("abort");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out);
    let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
    assert!(matches!(err, WarcMapError::MalformedRecord { .. }), "{err:?}");
    assert!(!out.exists());
    // no scratch or temp directories left next to the output
    let left: Vec<_> = fs::read_dir(tmp.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(left.len(), 2, "{left:?}");
}

/// `bad` declares only its HTTP status line, which ends on the blank line
/// closing the HTTP headers.
fn corpus_with_short_length(path: &Path) {
    let mut buf = Vec::new();
    response(WarcVersion::V10, "ok-1", b"first body").write_framed(&mut buf);
    let mut bad = response(WarcVersion::V10, "bad", b"HTTP/1.1 200 OK\r\n\r\n<html>real page</html>");
    bad.headers.iter_mut().find(|(k, _)| k == "Content-Length").unwrap().1 = "15".into();
    bad.write_framed(&mut buf);
    response(WarcVersion::V10, "ok-2", b"second body").write_framed(&mut buf);
    fs::write(path, buf).unwrap();
}

#[test]
fn short_content_length_is_not_stored_truncated() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("c.warc");
    corpus_with_short_length(&input);

    let out = tmp.path().join("abort");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out);
    let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
    assert!(matches!(err, WarcMapError::MalformedRecord { .. }), "{err:?}");
    assert!(!out.exists());

    let out = tmp.path().join("skip");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out).on_malformed(ErrorPolicy::Skip);
    let report = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
    assert_eq!((report.entries, report.skipped), (2, 1));
    let store = SortedStore::open(&out).unwrap();
    assert!(store.get("p-bad").unwrap().is_none());
    assert_eq!(store.get_record("p-ok-2").unwrap().unwrap().body, b"second body");
}

#[test]
fn long_content_length_does_not_swallow_next_record() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("c.warc");
    let mut swallowed = Vec::new();
    response(WarcVersion::V018, "ok-2", b"second body").write_framed(&mut swallowed);
    let mut buf = Vec::new();
    let mut bad = response(WarcVersion::V018, "bad", b"own body");
    // own body, its terminator, then "ok-2" up to its terminator
    let len = b"own body".len() + swallowed.len();
    bad.headers.iter_mut().find(|(k, _)| k == "Content-Length").unwrap().1 = len.to_string();
    bad.write_framed(&mut buf);
    buf.extend_from_slice(&swallowed);
    fs::write(&input, buf).unwrap();

    let out = tmp.path().join("abort");
    let cfg = PipelineConfig::new("p-", &input, "clueweb09", &out);
    let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
    assert!(matches!(err, WarcMapError::MalformedRecord { offset: 0, .. }), "{err:?}");
    assert!(!out.exists());

    let out = tmp.path().join("skip");
    let cfg = PipelineConfig::new("p-", &input, "clueweb09", &out).on_malformed(ErrorPolicy::Skip);
    let report = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
    assert_eq!((report.entries, report.skipped), (1, 1));
    let store = SortedStore::open(&out).unwrap();
    assert!(store.get("p-bad").unwrap().is_none());
    assert_eq!(store.get_record("p-ok-2").unwrap().unwrap().body, b"second body");
}

/// Fails the first attempt of every even split.
struct FlakyEvenSplits;

impl AttemptHook for FlakyEvenSplits {
    fn before_attempt(&self, split: &Split, attempt: u32) -> warcmap_core::Result<()> {
        if split.id % 2 == 0 && attempt == 1 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "injected worker loss").into());
        }
        Ok(())
    }
}

struct AlwaysFails;

impl AttemptHook for AlwaysFails {
    fn before_attempt(&self, split: &Split, _attempt: u32) -> warcmap_core::Result<()> {
        if split.id == 1 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone").into());
        }
        Ok(())
    }
}

#[test]
fn reruns_are_byte_identical() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("corpus");
    random_corpus(&input, WarcVersion::V10, 5, 40, 42);

    let base = PipelineConfig::new("cw12-", &input, "clueweb12", tmp.path().join("run-0"))
        .workers(1)
        .index_interval(8);
    Pipeline::new(base.clone(), FormatRegistry::builtin()).run().unwrap();
    let reference = store_files(&tmp.path().join("run-0"));

    let variants = [
        // more workers
        (PipelineConfig { output: tmp.path().join("run-1"), ..base.clone() }.workers(4), false),
        // tiny sort budget forces spilled runs
        (PipelineConfig { output: tmp.path().join("run-2"), ..base.clone() }.sort_budget(2048), false),
        // injected transient failures
        (PipelineConfig { output: tmp.path().join("run-3"), ..base.clone() }.workers(3), true),
    ];
    for (cfg, flaky) in variants {
        let out = cfg.output.clone();
        let mut p = Pipeline::new(cfg, FormatRegistry::builtin());
        if flaky {
            p = p.with_hook(Arc::new(FlakyEvenSplits));
        }
        let report = p.run().unwrap();
        if flaky {
            assert_eq!(report.attempts, 8); // 5 splits, 3 of them retried once
        }
        assert_eq!(store_files(&out), reference, "{}", out.display());
    }
}

#[test]
fn byte_range_splits_match_file_splits() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("corpus");
    random_corpus(&input, WarcVersion::V018, 2, 50, 3);

    let whole = tmp.path().join("whole");
    let cfg = PipelineConfig::new("p-", &input, "clueweb09", &whole).workers(2);
    let a = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();

    let ranged = tmp.path().join("ranged");
    let cfg = PipelineConfig::new("p-", &input, "clueweb09", &ranged)
        .workers(4)
        .split_size(Some(1000));
    let b = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();

    assert!(b.splits > a.splits);
    assert_eq!(a.entries, b.entries);
    // data and index match; the manifest records the split count
    assert_eq!(store_files(&whole)[..2], store_files(&ranged)[..2]);
}

#[test]
fn exhausted_retries_publish_nothing() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("corpus");
    random_corpus(&input, WarcVersion::V10, 3, 5, 9);
    let out = tmp.path().join("out");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out).max_attempts(2);
    let err = Pipeline::new(cfg, FormatRegistry::builtin())
        .with_hook(Arc::new(AlwaysFails))
        .run()
        .unwrap_err();
    assert!(matches!(err, WarcMapError::WorkerFailure { split: 1, attempts: 2, .. }), "{err:?}");
    assert!(!out.exists());
}

#[test]
fn empty_corpus_gives_empty_store() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("empty.warc");
    fs::write(&input, b"").unwrap();
    let out = tmp.path().join("out");
    let cfg = PipelineConfig::new("p-", &input, "clueweb12", &out);
    let report = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap();
    assert_eq!(report.entries, 0);
    assert!(SortedStore::open(&out).unwrap().is_empty());
}
