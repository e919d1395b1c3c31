//! Scenario 6 (modal robustness) and the router-precedence/guard-algebra
//! properties from the composition layer.

use std::sync::OnceLock;

use ratatui::widgets::Paragraph;
use tea_runtime::{KeyRule, Model, Prefix, Router, RouterBuilder, TermEvent, UpdateResult};
use tea_runtime_tester::UiTester;

#[derive(Clone, Default)]
struct NetModel {
    pings: i32,
}

enum NetMsg {
    Ping,
}

fn net_update(message: NetMsg, model: &NetModel) -> UpdateResult<NetModel, NetMsg> {
    match message {
        NetMsg::Ping => UpdateResult::model(NetModel { pings: model.pings + 1 }),
    }
}

#[derive(Clone, Default)]
struct ParentModel {
    net: NetModel,
    modal_active: bool,
    s_presses: i32,
}

enum ParentMsg {
    Input(TermEvent),
    Net(NetMsg),
}

impl From<TermEvent> for ParentMsg {
    fn from(event: TermEvent) -> Self {
        ParentMsg::Input(event)
    }
}

fn net_prefix() -> Prefix<ParentMsg, NetMsg> {
    Prefix::new(ParentMsg::Net, |message: ParentMsg| match message {
        ParentMsg::Net(inner) => Ok(inner),
        other => Err(other),
    })
}

fn router() -> &'static Router<ParentModel, ParentMsg> {
    static ROUTER: OnceLock<Router<ParentModel, ParentMsg>> = OnceLock::new();
    ROUTER.get_or_init(|| {
        RouterBuilder::new(|message: ParentMsg| match message {
            ParentMsg::Input(event) => Ok(event),
            other => Err(other),
        })
        .route(
            net_prefix(),
            |model: &ParentModel| model.net.clone(),
            |model: &ParentModel, net: NetModel| ParentModel { net, ..model.clone() },
            net_update,
        )
        .keymap(
            KeyRule::new(
                |event: &TermEvent| event.is_char('s'),
                |model: &ParentModel| {
                    UpdateResult::model(ParentModel {
                        s_presses: model.s_presses + 1,
                        ..model.clone()
                    })
                },
            )
            .when(|model: &ParentModel| !model.modal_active),
        )
        .build()
        .expect("this router has no conflicting guard families")
    })
}

impl Model for ParentModel {
    type Message = ParentMsg;

    /// Delivers a "net"-routed message unconditionally, the way a completed
    /// background command would, regardless of the modal guard.
    fn init(&self) -> Option<ParentMsg> {
        Some(ParentMsg::Net(NetMsg::Ping))
    }

    fn update(&self, message: ParentMsg) -> UpdateResult<Self, ParentMsg> {
        router().dispatch(message, self)
    }

    fn view(&self, frame: &mut ratatui::Frame<'_>) {
        let text = format!("pings={} s_presses={}", self.net.pings, self.s_presses);
        frame.render_widget(Paragraph::new(text), frame.size());
    }
}

fn key(c: char) -> crossterm::event::KeyEvent {
    crossterm::event::KeyEvent::new(crossterm::event::KeyCode::Char(c), crossterm::event::KeyModifiers::NONE)
}

#[tokio::test]
async fn a_guarded_off_keymap_never_blocks_a_routed_child_message() {
    let model = ParentModel {
        modal_active: true,
        ..ParentModel::default()
    };
    let tester = UiTester::spawn(model, 30, 3);

    tester
        .wait_for(|view| view.contains("pings=1"))
        .await
        .expect("the net-routed message should reach the child even while the modal guard is active");

    tester.send_key(key('s'));
    tester.sync().await;
    tester
        .wait_for_timeout(|view| view.contains("pings=1 s_presses=0"), std::time::Duration::from_millis(200))
        .await
        .expect("the keymap handler must stay suppressed while modal_active is true");

    tester.abort();
}

#[test]
fn combining_when_and_unless_on_one_key_is_an_invariant() {
    let builder: RouterBuilder<ParentModel, ParentMsg> = RouterBuilder::new(|message: ParentMsg| match message {
        ParentMsg::Input(event) => Ok(event),
        other => Err(other),
    });
    let builder = builder.group_when(
        |_model: &ParentModel| true,
        vec![KeyRule::new(
            |event: &TermEvent| event.is_char('x'),
            |model: &ParentModel| UpdateResult::model(model.clone()),
        )
        .unless(|_model: &ParentModel| false)],
    );
    assert!(builder.build().is_err());
}
