mod common;

use common::*;
use cfdi_classify_rust::error::{ClassificationServiceError, StoreError};
use cfdi_classify_rust::models::{
    ApprovalStatus, CategoryPath, ClassificationSource, ConversionParams, PackageKind,
    ReviewStatus, SkuApproval,
};
use cfdi_classify_rust::service::{derive_sku_key, AiSuggestion};
use cfdi_classify_rust::{Error, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cache_hit_skips_the_classifier() {
    let h = Harness::new(ScriptedClassifier::always(oil_suggestion()));
    let key = derive_sku_key("01010101", "Aceite de Oliva 1L", Some("LTR"));

    // 先审批 (此时还没有任何明细)
    let report = h.approvals.submit(vec![oil_approval(&key)]).await;
    assert_eq!(report.committed.len(), 1);
    assert_eq!(report.committed[0].items_updated, 0);

    let inv = invoice(
        "uuid-cache-hit",
        vec![
            line("01010101", "ACEITE DE OLIVA 1L", "3", Some("ltr")),
            line("01010101", "Aceite  de  Oliva 1L.", "2", Some("LTR")),
        ],
    );
    let ingest = h.orchestrator.ingest_invoice(&inv).await.unwrap();

    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(ingest.from_cache, 2);
    assert_eq!(ingest.from_ai, 0);

    let items = h.store.list_items_by_key(&key).await.unwrap();
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.source, ClassificationSource::Approved);
        assert_eq!(item.approval_status(), ApprovalStatus::Approved);
        assert_eq!(item.standardized_unit.as_deref(), Some("Litros"));
        assert!(!item.needs_review);
    }

    let sku = h.cache.lookup(&key).await.unwrap().unwrap();
    assert_eq!(sku.usage_count, 2);
    assert!(sku.last_used.is_some());
    assert_eq!(h.orchestrator.stats().cache_hits, 2);
}

#[tokio::test]
async fn ai_result_is_provisional_and_standardized() {
    let h = Harness::new(ScriptedClassifier::always(AiSuggestion {
        category: CategoryPath::new("Bebidas", "Cervezas", "Cerveza clara"),
        confidence: 0.8,
        standardized_unit: Some("Piezas".to_string()),
        conversion_factor: Some(dec("6")),
    }));

    let inv = invoice(
        "uuid-ai",
        vec![line("50202201", "Cerveza clara six pack", "12", Some("caja"))],
    );
    let report = h.orchestrator.ingest_invoice(&inv).await.unwrap();
    assert_eq!(report.from_ai, 1);

    let key = derive_sku_key("50202201", "Cerveza clara six pack", Some("caja"));
    let items = h.store.list_items_by_key(&key).await.unwrap();
    let item = &items[0];
    assert!(item.is_pending());
    assert_eq!(item.source.confidence(), Some(0.8));
    assert_eq!(item.standardized_quantity, Some(dec("72")));
    assert_eq!(item.conversion_factor, Some(dec("6")));
    assert!(!item.needs_review);
    assert_eq!(h.cache.lookup(&key).await.unwrap(), None);
}

#[tokio::test]
async fn ai_unit_outside_set_is_dropped_and_flagged() {
    let h = Harness::new(ScriptedClassifier::always(AiSuggestion {
        standardized_unit: Some("Galones".to_string()),
        conversion_factor: None,
        ..oil_suggestion()
    }));

    let inv = invoice("uuid-unit", vec![line("01010101", "Aceite vegetal", "4", None)]);
    h.orchestrator.ingest_invoice(&inv).await.unwrap();

    let key = derive_sku_key("01010101", "Aceite vegetal", None);
    let item = &h.store.list_items_by_key(&key).await.unwrap()[0];
    assert!(item.category.is_some());
    assert_eq!(item.standardized_unit, None);
    assert_eq!(item.standardized_quantity, None);
    assert!(item.needs_review);
}

#[tokio::test]
async fn ai_path_outside_taxonomy_leaves_item_unclassified() {
    let h = Harness::new(ScriptedClassifier::always(AiSuggestion {
        category: CategoryPath::new("Abarrotes", "Cervezas", "Cerveza clara"),
        ..oil_suggestion()
    }));

    let inv = invoice("uuid-bad-path", vec![line("1", "Cosa rara", "1", Some("H87"))]);
    let report = h.orchestrator.ingest_invoice(&inv).await.unwrap();
    assert_eq!(report.unclassified, 1);

    let key = derive_sku_key("1", "Cosa rara", Some("H87"));
    let item = &h.store.list_items_by_key(&key).await.unwrap()[0];
    assert_eq!(item.category, None);
    assert_eq!(item.source.confidence(), Some(0.0));
    assert!(item.is_pending());
}

#[tokio::test]
async fn failure_on_one_line_does_not_block_the_invoice() {
    let h = Harness::new(ScriptedClassifier::new(|req| {
        if req.description == "Producto linea 3" {
            Err(ClassificationServiceError::Malformed("not json".to_string()))
        } else {
            Ok(oil_suggestion())
        }
    }));

    let lines = (1..=10)
        .map(|i| line("01010101", &format!("Producto linea {}", i), "1", Some("LTR")))
        .collect();
    let report = h.orchestrator.ingest_invoice(&invoice("uuid-10", lines)).await.unwrap();

    assert_eq!(report.total_items, 10);
    assert_eq!(report.from_ai, 9);
    assert_eq!(report.unclassified, 1);

    for i in 1..=10 {
        let key = derive_sku_key("01010101", &format!("Producto linea {}", i), Some("LTR"));
        let items = h.store.list_items_by_key(&key).await.unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.line_number, i);
        assert_eq!(item.approval_status(), ApprovalStatus::Pending);
        if i == 3 {
            assert_eq!(item.category, None);
            assert_eq!(item.standardized_unit, None);
            assert_eq!(item.source.confidence(), Some(0.0));
            assert!(item.needs_review);
        } else {
            assert!(item.category.is_some());
        }
    }

    let stats = h.orchestrator.stats();
    assert_eq!(stats.ai_successes, 9);
    assert_eq!(stats.ai_failures, 1);
}

#[tokio::test]
async fn slow_classifier_times_out_to_pending() {
    let h = Harness::with_store(
        Arc::new(MemoryStore::new()),
        ScriptedClassifier::always(oil_suggestion()).with_delay(Duration::from_millis(500)),
        Duration::from_millis(20),
    );

    let inv = invoice("uuid-slow", vec![line("01010101", "Aceite lento", "1", Some("LTR"))]);
    let report = h.orchestrator.ingest_invoice(&inv).await.unwrap();

    assert_eq!(report.unclassified, 1);
    assert_eq!(h.orchestrator.stats().ai_failures, 1);
}

#[tokio::test]
async fn duplicate_invoice_is_rejected_before_classification() {
    let h = Harness::new(ScriptedClassifier::always(oil_suggestion()));
    let inv = invoice("uuid-dup", vec![line("01010101", "Aceite", "1", Some("LTR"))]);

    h.orchestrator.ingest_invoice(&inv).await.unwrap();
    let err = h.orchestrator.ingest_invoice(&inv).await.unwrap_err();

    assert!(matches!(err, Error::DuplicateInvoice(ref uuid) if uuid == "uuid-dup"));
    assert_eq!(h.classifier.calls(), 1);
}

#[tokio::test]
async fn approval_propagates_to_every_item_with_the_key() {
    let h = Harness::new(ScriptedClassifier::always(AiSuggestion {
        category: CategoryPath::new("Abarrotes", "Aceites", "Aceite vegetal"),
        ..oil_suggestion()
    }));

    for n in 0..5 {
        let inv = invoice(
            &format!("uuid-prop-{}", n),
            vec![line("01010101", "Aceite de Oliva 1L", "2", Some("LTR"))],
        );
        h.orchestrator.ingest_invoice(&inv).await.unwrap();
    }
    let key = derive_sku_key("01010101", "Aceite de Oliva 1L", Some("LTR"));

    let pending = h.approvals.pending(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sku_key, key);
    assert_eq!(pending[0].frequency, 5);

    let report = h.approvals.submit(vec![oil_approval(&key)]).await;
    assert!(report.rejected.is_empty());
    assert_eq!(report.committed[0].items_updated, 5);

    let items = h.store.list_items_by_key(&key).await.unwrap();
    assert_eq!(items.len(), 5);
    let sku = h.cache.lookup(&key).await.unwrap().unwrap();
    for item in &items {
        assert_eq!(item.approval_status(), ApprovalStatus::Approved);
        assert_eq!(item.category.as_ref(), Some(&sku.category));
        assert_eq!(item.standardized_unit.as_ref(), Some(&sku.standardized_unit));
        assert_eq!(item.standardized_quantity, Some(dec("2")));
    }
    assert!(h.approvals.pending(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_propagation_updates_nothing_for_that_key() {
    let good = derive_sku_key("1", "Aceite bueno", Some("LTR"));
    let bad = derive_sku_key("2", "Aceite malo", Some("LTR"));
    let h = Harness::with_store(
        Arc::new(FaultyStore::new().interrupting_approval(&bad)),
        ScriptedClassifier::always(oil_suggestion()),
        Duration::from_secs(5),
    );

    for n in 0..5 {
        let inv = invoice(
            &format!("uuid-int-{}", n),
            vec![
                line("1", "Aceite bueno", "1", Some("LTR")),
                line("2", "Aceite malo", "1", Some("LTR")),
            ],
        );
        h.orchestrator.ingest_invoice(&inv).await.unwrap();
    }

    let report = h
        .approvals
        .submit(vec![oil_approval(&good), oil_approval(&bad)])
        .await;

    assert_eq!(report.committed.len(), 1);
    assert_eq!(report.committed[0].sku_key, good);
    assert_eq!(report.committed[0].items_updated, 5);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].sku_key, bad);
    assert_eq!(report.rejected[0].field, "storage");

    let bad_items = h.store.list_items_by_key(&bad).await.unwrap();
    assert_eq!(bad_items.len(), 5);
    assert!(bad_items.iter().all(|i| i.is_pending()));
    assert_eq!(h.cache.lookup(&bad).await.unwrap(), None);
}

#[tokio::test]
async fn invalid_submissions_are_rejected_individually() {
    let h = Harness::new(ScriptedClassifier::failing());
    let keys: Vec<String> = (0..4).map(|i| format!("sku_test_{}", i)).collect();

    let mut unknown_category = oil_approval(&keys[1]);
    unknown_category.category = "Juguetes".to_string();
    let mut wrong_leaf = oil_approval(&keys[2]);
    wrong_leaf.sub_subcategory = "Cerveza clara".to_string();

    let report = h
        .approvals
        .submit(vec![
            oil_approval(&keys[0]),
            unknown_category,
            wrong_leaf,
            oil_approval(&keys[3]),
        ])
        .await;

    assert_eq!(report.committed.len(), 2);
    assert_eq!(report.rejected.len(), 2);

    let rejected_1 = report.rejected.iter().find(|r| r.sku_key == keys[1]).unwrap();
    assert_eq!(rejected_1.rule, "unknown_category");
    assert_eq!(rejected_1.field, "category");
    let rejected_2 = report.rejected.iter().find(|r| r.sku_key == keys[2]).unwrap();
    assert_eq!(rejected_2.rule, "sub_subcategory_not_in_subcategory");
    assert_eq!(rejected_2.field, "sub_subcategory");

    assert!(h.cache.lookup(&keys[0]).await.unwrap().is_some());
    assert!(h.cache.lookup(&keys[1]).await.unwrap().is_none());
    assert!(h.cache.lookup(&keys[2]).await.unwrap().is_none());
    assert!(h.cache.lookup(&keys[3]).await.unwrap().is_some());
}

#[tokio::test]
async fn unit_and_factor_rules_are_enforced() {
    let h = Harness::new(ScriptedClassifier::failing());

    let mut bad_unit = oil_approval("sku_unit");
    bad_unit.standardized_unit = "Galones".to_string();
    let mut zero_factor = oil_approval("sku_zero");
    zero_factor.units_per_package = dec("0");
    let empty_key = oil_approval("   ");

    let report = h.approvals.submit(vec![bad_unit, zero_factor, empty_key]).await;
    assert!(report.committed.is_empty());

    let rules: Vec<&str> = report.rejected.iter().map(|r| r.rule.as_str()).collect();
    assert_eq!(
        rules,
        vec!["unknown_unit", "non_positive_units_per_package", "empty_identity_key"]
    );
}

#[tokio::test]
async fn duplicate_key_in_batch_keeps_the_first() {
    let h = Harness::new(ScriptedClassifier::failing());
    let mut second = oil_approval("sku_dup");
    second.sub_subcategory = "Aceite vegetal".to_string();

    let report = h.approvals.submit(vec![oil_approval("sku_dup"), second]).await;
    assert_eq!(report.committed.len(), 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].rule, "duplicate_in_batch");

    let sku = h.cache.lookup("sku_dup").await.unwrap().unwrap();
    assert_eq!(sku.category.sub_subcategory, "Aceite de oliva");
}

#[tokio::test]
async fn re_approval_overwrites_and_keeps_usage() {
    let h = Harness::new(ScriptedClassifier::failing());
    let key = derive_sku_key("01010101", "Aceite", Some("LTR"));

    h.approvals.submit(vec![oil_approval(&key)]).await;
    h.orchestrator
        .ingest_invoice(&invoice("uuid-re", vec![line("01010101", "Aceite", "1", Some("LTR"))]))
        .await
        .unwrap();

    let mut changed = oil_approval(&key);
    changed.sub_subcategory = "Aceite vegetal".to_string();
    changed.approved_by = Some("luis".to_string());
    let report = h.approvals.submit(vec![changed]).await;
    assert_eq!(report.committed[0].items_updated, 1);

    let sku = h.cache.lookup(&key).await.unwrap().unwrap();
    assert_eq!(sku.category.sub_subcategory, "Aceite vegetal");
    assert_eq!(sku.approved_by, "luis");
    assert_eq!(sku.usage_count, 1);

    let item = &h.store.list_items_by_key(&key).await.unwrap()[0];
    assert_eq!(item.category.as_ref().unwrap().sub_subcategory, "Aceite vegetal");
}

#[tokio::test]
async fn non_approved_review_status_does_not_propagate_or_hit() {
    let h = Harness::new(ScriptedClassifier::always(oil_suggestion()));
    let key = derive_sku_key("01010101", "Aceite", Some("LTR"));

    h.orchestrator
        .ingest_invoice(&invoice("uuid-nr-1", vec![line("01010101", "Aceite", "1", Some("LTR"))]))
        .await
        .unwrap();

    let mut deprecated = oil_approval(&key);
    deprecated.review_status = Some(ReviewStatus::Deprecated);
    let report = h.approvals.submit(vec![deprecated]).await;
    assert_eq!(report.committed[0].items_updated, 0);
    assert_eq!(report.committed[0].review_status, ReviewStatus::Deprecated);

    // 已废弃的缓存行按未命中处理
    h.orchestrator
        .ingest_invoice(&invoice("uuid-nr-2", vec![line("01010101", "Aceite", "1", Some("LTR"))]))
        .await
        .unwrap();
    assert_eq!(h.classifier.calls(), 2);

    let items = h.store.list_items_by_key(&key).await.unwrap();
    assert!(items.iter().all(|i| i.is_pending()));

    let pending = h.approvals.pending(None).await.unwrap();
    assert_eq!(pending[0].existing_review_status, Some(ReviewStatus::Deprecated));
}

#[tokio::test]
async fn deprecating_an_approved_key_keeps_its_classification() {
    let h = Harness::new(ScriptedClassifier::failing());
    let key = derive_sku_key("01010101", "Aceite", Some("LTR"));

    h.approvals.submit(vec![oil_approval(&key)]).await;
    h.orchestrator
        .ingest_invoice(&invoice("uuid-dep", vec![line("01010101", "Aceite", "1", Some("LTR"))]))
        .await
        .unwrap();

    // 换了分类路径，但状态不是 approved：只改审核字段
    let mut deprecated = oil_approval(&key);
    deprecated.sub_subcategory = "Aceite vegetal".to_string();
    deprecated.review_status = Some(ReviewStatus::Deprecated);
    deprecated.approved_by = Some("luis".to_string());
    let report = h.approvals.submit(vec![deprecated]).await;
    assert_eq!(report.committed.len(), 1);
    assert_eq!(report.committed[0].items_updated, 0);

    let sku = h.cache.lookup(&key).await.unwrap().unwrap();
    assert_eq!(sku.review_status, ReviewStatus::Deprecated);
    assert_eq!(sku.category.sub_subcategory, "Aceite de oliva");
    assert_eq!(sku.approved_by, "luis");
    assert_eq!(sku.usage_count, 1);

    let item = &h.store.list_items_by_key(&key).await.unwrap()[0];
    assert_eq!(item.approval_status(), ApprovalStatus::Approved);
    assert_eq!(item.category.as_ref(), Some(&sku.category));
    assert_eq!(item.standardized_unit.as_ref(), Some(&sku.standardized_unit));
}

#[tokio::test]
async fn lookup_error_falls_through_to_the_classifier() {
    let broken = derive_sku_key("01010101", "Aceite dos", Some("LTR"));
    let h = Harness::with_store(
        Arc::new(FaultyStore::new().failing_lookup(&broken)),
        ScriptedClassifier::always(oil_suggestion()),
        Duration::from_secs(5),
    );

    let inv = invoice(
        "uuid-lookup",
        vec![
            line("01010101", "Aceite uno", "1", Some("LTR")),
            line("01010101", "Aceite dos", "1", Some("LTR")),
            line("01010101", "Aceite tres", "1", Some("LTR")),
        ],
    );
    let report = h.orchestrator.ingest_invoice(&inv).await.unwrap();
    assert_eq!(report.total_items, 3);
    assert_eq!(report.from_ai, 3);
    assert_eq!(h.classifier.calls(), 3);

    for description in ["Aceite uno", "Aceite dos", "Aceite tres"] {
        let key = derive_sku_key("01010101", description, Some("LTR"));
        let items = h.store.list_items_by_key(&key).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].invoice_id, report.invoice_id);
    }

    let err = h.orchestrator.ingest_invoice(&inv).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateInvoice(_)));
}

#[tokio::test]
async fn failed_invoice_write_leaves_nothing_behind() {
    let h = Harness::with_store(
        Arc::new(FaultyStore::new().failing_invoice_writes(1)),
        ScriptedClassifier::always(oil_suggestion()),
        Duration::from_secs(5),
    );
    let inv = invoice(
        "uuid-retry",
        vec![
            line("01010101", "Aceite uno", "1", Some("LTR")),
            line("01010101", "Aceite dos", "1", Some("LTR")),
        ],
    );
    let key = derive_sku_key("01010101", "Aceite uno", Some("LTR"));

    let err = h.orchestrator.ingest_invoice(&inv).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Interrupted(_))));
    assert!(h.store.list_items_by_key(&key).await.unwrap().is_empty());
    assert!(!h.store.invoice_exists("uuid-retry").await.unwrap());

    // 整张发票重试
    let report = h.orchestrator.ingest_invoice(&inv).await.unwrap();
    assert_eq!(report.total_items, 2);
    assert_eq!(h.store.list_items_by_key(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_first_submission_does_not_shadow_a_later_one() {
    let h = Harness::new(ScriptedClassifier::failing());
    let mut invalid = oil_approval("sku_retry");
    invalid.standardized_unit = "Galones".to_string();

    let report = h
        .approvals
        .submit(vec![invalid, oil_approval("sku_retry")])
        .await;

    assert_eq!(report.committed.len(), 1);
    assert_eq!(report.committed[0].sku_key, "sku_retry");
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].rule, "unknown_unit");

    let sku = h.cache.lookup("sku_retry").await.unwrap().unwrap();
    assert_eq!(sku.standardized_unit, "Litros");
}

#[tokio::test]
async fn reclassify_retries_failed_items_and_converges_on_cache() {
    let first = Harness::new(ScriptedClassifier::failing());
    first
        .orchestrator
        .ingest_invoice(&invoice(
            "uuid-retry",
            vec![
                line("01010101", "Aceite", "1", Some("LTR")),
                line("02020202", "Arroz", "5", Some("KGM")),
            ],
        ))
        .await
        .unwrap();

    // 其中一个键在重试前被直接写入缓存 (未回填)
    let oil = derive_sku_key("01010101", "Aceite", Some("LTR"));
    first
        .cache
        .upsert(&SkuApproval {
            sku_key: oil.clone(),
            category: CategoryPath::new("Abarrotes", "Aceites", "Aceite de oliva"),
            standardized_unit: "Litros".to_string(),
            conversion: ConversionParams {
                units_per_package: dec("1"),
                package_kind: PackageKind::Volume,
                conversion_notes: None,
            },
            review_status: ReviewStatus::Approved,
            approved_by: "ana".to_string(),
        })
        .await
        .unwrap();

    let second = first.with_classifier(ScriptedClassifier::always(AiSuggestion {
        category: CategoryPath::new("Abarrotes", "Granos", "Arroz"),
        standardized_unit: Some("Kilogramos".to_string()),
        ..oil_suggestion()
    }));
    let report = second.orchestrator.reclassify_pending(100).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.from_cache, 1);
    assert_eq!(report.from_ai, 1);
    assert_eq!(second.classifier.calls(), 1);

    let oil_item = &second.store.list_items_by_key(&oil).await.unwrap()[0];
    assert_eq!(oil_item.approval_status(), ApprovalStatus::Approved);

    let rice = derive_sku_key("02020202", "Arroz", Some("KGM"));
    let rice_item = &second.store.list_items_by_key(&rice).await.unwrap()[0];
    assert!(rice_item.is_pending());
    assert_eq!(rice_item.standardized_quantity, Some(dec("5")));

    // 再跑一次结果不变
    let again = second.orchestrator.reclassify_pending(100).await.unwrap();
    assert_eq!(again.scanned, 1);
    assert_eq!(again.from_ai, 1);
}

#[tokio::test]
async fn pending_queue_is_ordered_and_filtered() {
    let h = Harness::new(ScriptedClassifier::always(oil_suggestion()));
    for n in 0..3 {
        let mut lines = vec![line("1", "Aceite frecuente", "1.5", Some("LTR"))];
        if n == 0 {
            lines.push(line("2", "Aceite raro", "1", Some("LTR")));
        }
        h.orchestrator
            .ingest_invoice(&invoice(&format!("uuid-q-{}", n), lines))
            .await
            .unwrap();
    }

    let all = h.approvals.pending(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].frequency, 3);
    assert_eq!(all[0].total_quantity, dec("4.5"));
    assert_eq!(all[0].suggested_unit.as_deref(), Some("Litros"));
    assert_eq!(all[1].frequency, 1);

    let frequent = h.approvals.pending(Some(2)).await.unwrap();
    assert_eq!(frequent.len(), 1);

    let csv = String::from_utf8(h.approvals.pending_csv(None).await.unwrap()).unwrap();
    assert_eq!(csv.lines().count(), 3);
}
