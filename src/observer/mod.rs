//! Live observers over specifications.
//!
//! Observers are embedded (in-process). Each one holds the inverses of its
//! specification; when facts are saved, the dispatcher worker runs only the
//! inverses triggered by the new facts' types and turns their rows into
//! [`ObservationEvent`]s.

/// Registration and event dispatch worker.
pub mod dispatcher;
/// Observer identities and event types.
pub mod events;
mod listener;
/// Observer stream handle.
pub mod stream;

pub use dispatcher::{ObserverSystem, ObserverSystemConfig};
pub use events::{ObservationEvent, ObserverId};
pub use stream::Observer;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::fact::{Fact, FactGraph, FactReference};
    use crate::network::CancellationToken;
    use crate::specification::Specification;
    use crate::storage::{FactStore, InMemoryFactStore};

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        store: Arc<InMemoryFactStore>,
        system: ObserverSystem,
        company: Fact,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryFactStore::new());
            let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
            let system = ObserverSystem::new(ObserverSystemConfig::default(), store.clone()).unwrap();
            let fixture = Self { store, system, company };
            fixture.save(&[fixture.company.clone()]);
            fixture
        }

        fn save(&self, facts: &[Fact]) -> Vec<FactReference> {
            let mut graph = FactGraph::new();
            for f in facts {
                graph.add(f.clone().into()).unwrap();
            }
            let saved: Vec<FactReference> = self
                .store
                .save(&graph)
                .unwrap()
                .into_iter()
                .map(|e| e.fact.reference().clone())
                .collect();
            self.system.notify_saved(saved.clone());
            saved
        }

        fn office(&self, city: &str) -> Fact {
            Fact::builder("Office")
                .predecessor("company", self.company.reference())
                .field("city", city)
                .build()
                .unwrap()
        }

        fn start(&self) -> Vec<FactReference> {
            vec![self.company.reference().clone()]
        }
    }

    fn closure(office: &Fact) -> Fact {
        Fact::builder("Office.Closure")
            .predecessor("office", office.reference())
            .field("date", "2026-01-01")
            .build()
            .unwrap()
    }

    fn open_offices() -> Specification {
        Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                    !E {
                        closure: Office.Closure [
                            closure->office: Office = office
                        ]
                    }
                ]
            } => office.city",
        )
        .unwrap()
    }

    #[test]
    fn test_initial_results_then_added() {
        let fixture = Fixture::new();
        let dallas = fixture.office("Dallas");
        fixture.save(&[dallas.clone()]);

        let observer = fixture
            .system
            .watch(&fixture.start(), &open_offices(), CancellationToken::new())
            .unwrap();
        assert_eq!(observer.initial_results().len(), 1);

        let austin = fixture.office("Austin");
        fixture.save(&[austin.clone()]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert!(event.is_added());
        assert_eq!(event.tuple().get("office"), Some(austin.reference()));
    }

    #[test]
    fn test_negative_existential_removes() {
        let fixture = Fixture::new();
        let dallas = fixture.office("Dallas");
        fixture.save(&[dallas.clone()]);
        let observer = fixture
            .system
            .watch(&fixture.start(), &open_offices(), CancellationToken::new())
            .unwrap();

        fixture.save(&[closure(&dallas)]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert_eq!(
            event,
            ObservationEvent::Removed {
                tuple: observer.initial_results()[0].tuple.clone()
            }
        );
    }

    #[test]
    fn test_other_company_is_ignored() {
        let fixture = Fixture::new();
        let observer = fixture
            .system
            .watch(&fixture.start(), &open_offices(), CancellationToken::new())
            .unwrap();

        let other = Fact::builder("Company").field("identifier", "fabrikam").build().unwrap();
        let elsewhere = Fact::builder("Office")
            .predecessor("company", other.reference())
            .field("city", "Paris")
            .build()
            .unwrap();
        fixture.save(&[other, elsewhere]);
        let mine = fixture.office("Dallas");
        fixture.save(&[mine.clone()]);

        // Events arrive in save order, so the first one is for our office.
        let event = observer.recv_timeout(WAIT).unwrap();
        assert_eq!(event.tuple().get("office"), Some(mine.reference()));
    }

    #[test]
    fn test_positive_existential_is_confirmed() {
        let fixture = Fixture::new();
        let spec = Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                    E {
                        closure: Office.Closure [
                            closure->office: Office = office
                        ]
                    }
                ]
            } => office",
        )
        .unwrap();
        let dallas = fixture.office("Dallas");
        fixture.save(&[dallas.clone()]);
        let observer = fixture.system.watch(&fixture.start(), &spec, CancellationToken::new()).unwrap();
        assert!(observer.initial_results().is_empty());

        fixture.save(&[closure(&dallas)]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, ObservationEvent::Added { .. }));
        assert_eq!(event.tuple().get("office"), Some(dallas.reference()));

        // A second closure does not add the office again.
        let again = Fact::builder("Office.Closure")
            .predecessor("office", dallas.reference())
            .field("date", "2026-02-01")
            .build()
            .unwrap();
        fixture.save(&[again]);
        let austin = fixture.office("Austin");
        fixture.save(&[austin.clone(), closure(&austin)]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert_eq!(event.tuple().get("office"), Some(austin.reference()));
    }

    #[test]
    fn test_collection_children() {
        let fixture = Fixture::new();
        let spec = Specification::parse(
            "(company: Company) {
                office: Office [
                    office->company: Company = company
                ]
            } => {
                city = office.city
                employees = {
                    employee: Employee [
                        employee->office: Office = office
                    ]
                } => employee.name
            }",
        )
        .unwrap();
        let dallas = fixture.office("Dallas");
        fixture.save(&[dallas.clone()]);
        let observer = fixture.system.watch(&fixture.start(), &spec, CancellationToken::new()).unwrap();

        let employee = Fact::builder("Employee")
            .predecessor("office", dallas.reference())
            .field("name", "Ada")
            .build()
            .unwrap();
        fixture.save(&[employee.clone()]);
        match observer.recv_timeout(WAIT).unwrap() {
            ObservationEvent::ChildAdded {
                collection,
                parent,
                result,
            } => {
                assert_eq!(collection, vec!["employees"]);
                assert_eq!(parent, observer.initial_results()[0].tuple);
                assert_eq!(result.tuple.get("employee"), Some(employee.reference()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_given_used_only_in_an_existential() {
        let fixture = Fixture::new();
        let spec = Specification::parse(
            "(company: Company, user: User) {
                office: Office [
                    office->company: Company = company
                    !E {
                        hidden: Hidden [
                            hidden->office: Office = office
                            hidden->user: User = user
                        ]
                    }
                ]
            } => office",
        )
        .unwrap();
        let user = Fact::builder("User").field("publicKey", "ada").build().unwrap();
        let other = Fact::builder("User").field("publicKey", "bob").build().unwrap();
        fixture.save(&[user.clone(), other.clone()]);
        let start = vec![fixture.company.reference().clone(), user.reference().clone()];
        let observer = fixture.system.watch(&start, &spec, CancellationToken::new()).unwrap();
        assert!(observer.initial_results().is_empty());

        let dallas = fixture.office("Dallas");
        fixture.save(&[dallas.clone()]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, ObservationEvent::Added { .. }));
        assert_eq!(event.tuple().get("office"), Some(dallas.reference()));
        assert_eq!(event.tuple().get("user"), Some(user.reference()));

        let hide = |u: &Fact| {
            Fact::builder("Hidden")
                .predecessor("office", dallas.reference())
                .predecessor("user", u.reference())
                .build()
                .unwrap()
        };
        // Hiding the office from someone else changes nothing for this observer.
        fixture.save(&[hide(&other)]);
        fixture.save(&[hide(&user)]);
        let event = observer.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, ObservationEvent::Removed { .. }));
        assert_eq!(event.tuple().get("office"), Some(dallas.reference()));
    }

    #[test]
    fn test_cancelled_observer_stops_receiving() {
        let fixture = Fixture::new();
        let observer = fixture
            .system
            .watch(&fixture.start(), &open_offices(), CancellationToken::new())
            .unwrap();
        observer.cancel();
        assert!(observer.is_cancelled());
        fixture.save(&[fixture.office("Dallas")]);
        assert!(observer.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_watch_with_cancelled_token_fails() {
        let fixture = Fixture::new();
        let token = CancellationToken::new();
        token.cancel();
        let err = fixture.system.watch(&fixture.start(), &open_offices(), token).unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_watch_reports_arity_errors() {
        let fixture = Fixture::new();
        let err = fixture
            .system
            .watch(&[], &open_offices(), CancellationToken::new())
            .unwrap_err();
        assert!(err.is_structural());
    }
}
