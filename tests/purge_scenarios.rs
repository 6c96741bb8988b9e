use kyrofact::specification::{Match, Projection, Role, SpecificationBuilder};
use kyrofact::{Fact, FactEngine, FactStore, KyroFactError, PurgeConditions, PurgeError, Specification};

fn company() -> Fact {
    Fact::builder("Company").field("identifier", "contoso").build().unwrap()
}

fn office(company: &Fact, city: &str) -> Fact {
    Fact::builder("Office")
        .predecessor("company", company.reference())
        .field("city", city)
        .build()
        .unwrap()
}

fn office_conditions() -> PurgeConditions {
    PurgeConditions::new()
        .purge("Office")
        .when_exists("Office.Closure", [Role::new("office", "Office")])
        .unwrap()
}

fn offices_of_company(exclude_closed: bool) -> Specification {
    let mut office = Match::new("office", "Office").successor_of("company", [Role::new("company", "Company")]);
    if exclude_closed {
        office = office.where_no([
            Match::new("closure", "Office.Closure").successor_of("office", [Role::new("office", "Office")])
        ]);
    }
    SpecificationBuilder::new()
        .given("company", "Company")
        .matching(office)
        .select(Projection::simple("office"))
        .unwrap()
}

#[test]
fn closed_office_disappears_from_compliant_query() {
    let engine = FactEngine::in_memory(office_conditions()).unwrap();
    let c = company();
    let dallas = office(&c, "Dallas");
    engine.save_facts([c.clone(), dallas.clone()]).unwrap();

    let spec = offices_of_company(true);
    let start = [c.reference().clone()];
    assert_eq!(engine.query(&start, &spec).unwrap().len(), 1);

    let closure = Fact::builder("Office.Closure")
        .predecessor("office", dallas.reference())
        .field("date", "2026-03-01")
        .build()
        .unwrap();
    engine.save_facts([closure]).unwrap();
    assert!(engine.query(&start, &spec).unwrap().is_empty());
}

#[test]
fn query_without_exclusion_fails_before_running() {
    let engine = FactEngine::in_memory(office_conditions()).unwrap();
    let c = company();
    engine.save_facts([c.clone(), office(&c, "Dallas")]).unwrap();

    let err = engine
        .query(&[c.reference().clone()], &offices_of_company(false))
        .unwrap_err();
    match err {
        KyroFactError::Purge(PurgeError::NonCompliant { reasons }) => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].starts_with("The match for Office is missing purge conditions:"));
            assert!(reasons[0].contains("Office.Closure"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn reversible_condition_is_rejected_with_both_types() {
    let err = PurgeConditions::new()
        .purge("Office")
        .when_exists_matching("Office.Closure", [Role::new("office", "Office")], |m| {
            m.where_no([Match::new("reopening", "Office.Reopening")
                .successor_of("closure", [Role::new("closure", "Office.Closure")])])
        })
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Office"));
    assert!(message.contains("Office.Reopening"));
}

#[test]
fn purge_removes_successors_of_closed_office() {
    let engine = FactEngine::in_memory(office_conditions()).unwrap();
    let c = company();
    let dallas = office(&c, "Dallas");
    let manager = Fact::builder("Manager")
        .predecessor("office", dallas.reference())
        .field("employee_number", 7)
        .build()
        .unwrap();
    let closure = Fact::builder("Office.Closure")
        .predecessor("office", dallas.reference())
        .field("date", "2026-03-01")
        .build()
        .unwrap();
    engine
        .save_facts([c.clone(), dallas.clone(), manager.clone(), closure.clone()])
        .unwrap();

    assert_eq!(engine.purge().unwrap(), 1);
    let store = engine.store();
    assert!(store.get(manager.reference()).unwrap().is_none());
    assert!(store.get(closure.reference()).unwrap().is_some());
    assert!(store.get(dallas.reference()).unwrap().is_some());

    // Nothing left to remove.
    assert_eq!(engine.purge().unwrap(), 0);
}

#[test]
fn cancelled_order_keeps_cancellation_and_loses_shipment() {
    let conditions = PurgeConditions::new()
        .purge("Order")
        .when_exists(
            "Order.Cancelled.Reason",
            [Role::new("cancelled", "Order.Cancelled"), Role::new("order", "Order")],
        )
        .unwrap();
    let engine = FactEngine::in_memory(conditions).unwrap();

    let order = Fact::builder("Order").field("number", 1001).build().unwrap();
    let shipped = Fact::builder("Order.Shipped")
        .predecessor("order", order.reference())
        .field("carrier", "UPS")
        .build()
        .unwrap();
    let cancelled = Fact::builder("Order.Cancelled")
        .predecessor("order", order.reference())
        .build()
        .unwrap();
    let reason = Fact::builder("Order.Cancelled.Reason")
        .predecessor("cancelled", cancelled.reference())
        .field("text", "customer request")
        .build()
        .unwrap();
    engine
        .save_facts([order.clone(), shipped, cancelled.clone(), reason])
        .unwrap();

    let shipments = Specification::parse(
        "(order: Order) { shipped: Order.Shipped [ shipped->order: Order = order ] } => shipped",
    )
    .unwrap();
    let cancellations = Specification::parse(
        "(order: Order) { cancelled: Order.Cancelled [ cancelled->order: Order = order ] } => cancelled",
    )
    .unwrap();
    let start = [order.reference().clone()];
    assert_eq!(engine.query(&start, &shipments).unwrap().len(), 1);

    engine.purge().unwrap();

    assert!(engine.query(&start, &shipments).unwrap().is_empty());
    let remaining = engine.query(&start, &cancellations).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].tuple.get("cancelled"), Some(cancelled.reference()));
}

#[test]
fn condition_descriptions_render() {
    let described = office_conditions().describe();
    assert!(described.starts_with("purge (office: Office) {"));
    assert!(described.contains("closure: Office.Closure ["));
}
